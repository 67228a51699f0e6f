//! The dispatcher: rate limiting, retry and status mapping around a [`Transport`].
//!
//! Per call:
//! 1. Fail fast with [`RestError::Disposed`] after disposal.
//! 2. Retry loop: acquire a bucket ticket, send with the request timeout, learn from the
//!    response, retry rate-limit and transient outcomes.
//! 3. Map the final status onto an [`HttpErrorKind`], record the outcome, return.
//!
//! Disposal races every in-flight call; whatever suspension point a call is parked on, it
//! resolves with `Disposed`.
use crate::config::RestConfig;
use crate::error::{ConfigError, HttpErrorKind, RestError, TransportError};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::ratelimit::{BucketState, GlobalGate, RateLimitOutcome, RateLimitStrategy};
use crate::request::{BuiltRequest, RestRequest, Route};
use crate::response::{RawResponse, RestResponse};
use crate::retry::{Attempt, RetryPolicy};
use crate::telemetry::{emit_best_effort, DispatchEvent, NullSink, TelemetrySink};
use crate::trace::TraceId;
use crate::transport::Transport;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::Service;
use tracing::Instrument;

/// One send and what came back for it.
#[derive(Debug)]
struct Exchange {
    request: BuiltRequest,
    response: RawResponse,
}

struct Inner<T, S> {
    transport: T,
    strategy: RateLimitStrategy,
    retry: RetryPolicy<S>,
    metrics: MetricsCollector,
    config: RestConfig,
    sink: S,
    disposed: AtomicBool,
}

/// Rate-limit-aware REST client. Clones share all state.
pub struct RestClient<T, S = NullSink> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for RestClient<T, S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, S> fmt::Debug for RestClient<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.inner.config)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`RestClient`].
pub struct RestClientBuilder<T, S = NullSink> {
    transport: T,
    config: RestConfig,
    sink: S,
}

impl<T> RestClientBuilder<T, NullSink>
where
    T: Transport + 'static,
{
    pub fn new(transport: T) -> Self {
        Self { transport, config: RestConfig::default(), sink: NullSink }
    }
}

impl<T, S> RestClientBuilder<T, S>
where
    T: Transport + 'static,
    S: TelemetrySink,
{
    pub fn config(mut self, config: RestConfig) -> Self {
        self.config = config;
        self
    }

    /// Send dispatch events to `sink`.
    pub fn sink<S2>(self, sink: S2) -> RestClientBuilder<T, S2>
    where
        S2: TelemetrySink,
    {
        RestClientBuilder { transport: self.transport, config: self.config, sink }
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> Result<RestClient<T, S>, ConfigError> {
        self.config.validate()?;

        let mut retry = RetryPolicy::builder().fallback_delay(self.config.retry_fallback_delay);
        if let Some(attempts) = self.config.max_retry_attempts {
            retry = retry.max_attempts(attempts);
        }
        let retry = retry
            .sink(self.sink.clone())
            .build()
            .map_err(|_| ConfigError::MustBePositive { field: "max_retry_attempts" })?;

        let strategy = RateLimitStrategy::new(&self.config, Arc::new(GlobalGate::new()));
        Ok(RestClient {
            inner: Arc::new(Inner {
                transport: self.transport,
                strategy,
                retry,
                metrics: MetricsCollector::new(),
                config: self.config,
                sink: self.sink,
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

impl<T> RestClient<T, NullSink>
where
    T: Transport + 'static,
{
    pub fn builder(transport: T) -> RestClientBuilder<T, NullSink> {
        RestClientBuilder::new(transport)
    }

    /// Client with `config` and no telemetry.
    pub fn new(transport: T, config: RestConfig) -> Result<Self, ConfigError> {
        Self::builder(transport).config(config).build()
    }
}

impl<T, S> RestClient<T, S>
where
    T: Transport + 'static,
    S: TelemetrySink,
{
    /// Send `request`, honoring every rate limit, and map the final status.
    pub async fn execute(&self, request: &RestRequest) -> Result<RestResponse, RestError> {
        if self.is_disposed() {
            return Err(RestError::Disposed);
        }
        let trace_id = TraceId::new();
        let span = tracing::debug_span!(
            "rest_request",
            trace_id = %trace_id,
            route = %request.route(),
            method = %request.method(),
        );
        self.dispatch(request, trace_id).instrument(span).await
    }

    async fn dispatch(&self, request: &RestRequest, trace_id: TraceId) -> Result<RestResponse, RestError> {
        let gate = self.inner.strategy.gate();
        let result = tokio::select! {
            biased;
            _ = gate.disposed() => Err(RestError::Disposed),
            result = self.inner.retry.execute(|attempt| self.attempt(request, trace_id, attempt)) => {
                result.and_then(|exchange| self.finish(exchange))
            }
        };

        if let Err(err) = &result {
            match err {
                RestError::Disposed => tracing::debug!(url = request.url(), category = err.category(), "request cancelled"),
                RestError::Http { .. } => {
                    tracing::warn!(url = request.url(), category = err.category(), error = %err, "request failed")
                }
                RestError::Transport(_) => {
                    tracing::error!(url = request.url(), category = err.category(), error = %err, "request failed")
                }
            }
            self.emit(DispatchEvent::RequestFailed {
                trace_id,
                route: request.route().clone(),
                category: err.category(),
            })
            .await;
        }
        result
    }

    async fn attempt(&self, request: &RestRequest, trace_id: TraceId, attempt: usize) -> Attempt<Exchange> {
        let inner = &self.inner;
        let route = request.route();

        let ticket = match inner.strategy.acquire(route, request.exemption()).await {
            Ok(ticket) => ticket,
            Err(err) => return Attempt::Failed(err),
        };
        if !ticket.waited().is_zero() {
            self.emit(DispatchEvent::BucketWait { route: route.clone(), waited: ticket.waited() }).await;
        }

        let built = request.build();
        self.trace_payload("request", built.body.as_deref().unwrap_or_default());
        self.emit(DispatchEvent::RequestSent { trace_id, route: route.clone(), attempt: attempt + 1 }).await;

        let started = Instant::now();
        let timeout = inner.config.request_timeout;
        let sent = tokio::time::timeout(timeout, inner.transport.send(built.clone()))
            .await
            .unwrap_or_else(|_| Err(TransportError::timeout(timeout)));
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                drop(ticket);
                tracing::debug!(url = %built.url, error = %err, transient = err.is_transient(), "send failed");
                return if err.is_transient() {
                    Attempt::Transient(err.into())
                } else {
                    Attempt::Failed(err.into())
                };
            }
        };

        self.emit(DispatchEvent::ResponseReceived {
            trace_id,
            route: route.clone(),
            status: response.status.as_u16(),
            elapsed: started.elapsed(),
        })
        .await;
        self.trace_payload("response", &response.body);

        let exchange = Exchange { request: built, response };
        match inner.strategy.complete(ticket, &exchange.response) {
            RateLimitOutcome::Proceed => Attempt::Complete(exchange),
            RateLimitOutcome::RetryAfter { wait, global } => {
                let event = if global {
                    DispatchEvent::GlobalLimitHit { cooldown: wait }
                } else {
                    DispatchEvent::BucketLimitHit { route: route.clone(), cooldown: wait }
                };
                self.emit(event).await;
                Attempt::RetryAfter { wait, last: exchange }
            }
        }
    }

    fn finish(&self, exchange: Exchange) -> Result<RestResponse, RestError> {
        let Exchange { request, response } = exchange;
        let kind = HttpErrorKind::from_status(response.status);
        self.inner.metrics.record(kind);
        match kind {
            None => Ok(response.into()),
            Some(kind) => Err(RestError::http(kind, request, response)),
        }
    }

    fn trace_payload(&self, direction: &'static str, body: &[u8]) {
        if self.inner.config.anonymize_payloads {
            tracing::trace!(direction, payload = %format_args!("<{} bytes>", body.len()), "payload");
        } else {
            tracing::trace!(direction, payload = %String::from_utf8_lossy(body), "payload");
        }
    }

    async fn emit(&self, event: DispatchEvent) {
        emit_best_effort(self.inner.sink.clone(), event).await;
    }

    /// Shut the client down. Idempotent.
    ///
    /// In-flight calls resolve with `Disposed`, learned rate-limit state is dropped and the
    /// transport is closed. Transport close errors are logged and suppressed.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.strategy.gate().dispose();
        self.inner.strategy.dispose();
        tracing::debug!(category = "disposed", "rest client disposed");
        self.emit(DispatchEvent::Disposed).await;

        if let Err(err) = self.inner.transport.close().await {
            tracing::debug!(error = %err, "transport close failed during dispose");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Outcome counters. With `since_last_call`, the temporal set is reset after copying.
    pub fn metrics(&self, since_last_call: bool) -> MetricsSnapshot {
        self.inner.metrics.snapshot(since_last_call)
    }

    /// Copy of the learned bucket serving `route`.
    pub fn bucket(&self, route: &Route) -> Option<BucketState> {
        self.inner.strategy.bucket_state(route)
    }

    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T, S> Service<RestRequest> for RestClient<T, S>
where
    T: Transport + 'static,
    S: TelemetrySink,
{
    type Response = RestResponse;
    type Error = RestError;
    type Future = BoxFuture<'static, Result<RestResponse, RestError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_disposed() {
            Poll::Ready(Err(RestError::Disposed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, request: RestRequest) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(&request).await })
    }
}
