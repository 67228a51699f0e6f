//! Structured dispatch events.
//!
//! The pipeline describes what it does as [`DispatchEvent`] values and hands them to a
//! [`TelemetrySink`]. Sinks are `tower::Service<DispatchEvent>` implementations, so they can
//! be wrapped with ordinary tower combinators.
//!
//! # Events
//!
//! - **Requests**: `RequestSent`, `ResponseReceived`, `RequestFailed`
//! - **Rate limits**: `BucketWait`, `BucketLimitHit`, `GlobalLimitHit`
//! - **Retry**: `RetryScheduled`, `RetryExhausted`
//! - **Lifecycle**: `Disposed`
//!
//! ```rust
//! use restgate::telemetry::{DispatchEvent, MemorySink};
//! use tower::Service;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(DispatchEvent::GlobalLimitHit { cooldown: Duration::from_secs(2) }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use crate::request::Route;
use crate::trace::TraceId;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower_service::Service;

/// A sink that consumes dispatch events.
pub trait TelemetrySink:
    Service<DispatchEvent, Response = (), Error = Self::SinkError, Future = Self::SinkFuture>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
    /// The future returned by `call`.
    type SinkFuture: Future<Output = Result<(), Self::SinkError>> + Send + 'static;
}

/// Best-effort emit: waits for `poll_ready`, then drops the event if the sink errors.
///
/// Telemetry never fails a request.
pub async fn emit_best_effort<S>(sink: S, event: DispatchEvent)
where
    S: TelemetrySink,
{
    use tower::ServiceExt;

    if let Ok(mut ready) = sink.ready_oneshot().await {
        let _ = ready.call(event).await;
    }
}

/// Events emitted while dispatching.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// An attempt is about to hit the transport.
    RequestSent { trace_id: TraceId, route: Route, attempt: usize },
    /// The transport returned a response.
    ResponseReceived { trace_id: TraceId, route: Route, status: u16, elapsed: Duration },
    /// A call ended in an error; `category` is stable across releases.
    RequestFailed { trace_id: TraceId, route: Route, category: &'static str },
    /// An attempt was held back by its bucket or the global gate before sending.
    BucketWait { route: Route, waited: Duration },
    /// A 429 scoped to one bucket.
    BucketLimitHit { route: Route, cooldown: Duration },
    /// A 429 scoped to every route; the global gate is closed for `cooldown`.
    GlobalLimitHit { cooldown: Duration },
    /// A retry will run after `delay`. `attempt` is the attempt that just failed (1-indexed).
    RetryScheduled { attempt: usize, delay: Duration },
    /// The attempt budget ran out.
    RetryExhausted { attempts: usize },
    /// The client was disposed.
    Disposed,
}

impl DispatchEvent {
    /// Stable event category, used as the `category` log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RequestSent { .. } => "request_sent",
            Self::ResponseReceived { .. } => "response_received",
            Self::RequestFailed { category, .. } => *category,
            Self::BucketWait { .. } => "bucket_wait",
            Self::BucketLimitHit { .. } => "bucket_rate_limit",
            Self::GlobalLimitHit { .. } => "global_rate_limit",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestSent { trace_id, route, attempt } => {
                write!(f, "RequestSent({}, {}, attempt={})", trace_id, route, attempt)
            }
            Self::ResponseReceived { trace_id, route, status, elapsed } => write!(
                f,
                "ResponseReceived({}, {}, status={}, elapsed={:?})",
                trace_id, route, status, elapsed
            ),
            Self::RequestFailed { trace_id, route, category } => {
                write!(f, "RequestFailed({}, {}, {})", trace_id, route, category)
            }
            Self::BucketWait { route, waited } => {
                write!(f, "BucketWait({}, waited={:?})", route, waited)
            }
            Self::BucketLimitHit { route, cooldown } => {
                write!(f, "BucketLimitHit({}, cooldown={:?})", route, cooldown)
            }
            Self::GlobalLimitHit { cooldown } => write!(f, "GlobalLimitHit(cooldown={:?})", cooldown),
            Self::RetryScheduled { attempt, delay } => {
                write!(f, "RetryScheduled(#{}, delay={:?})", attempt, delay)
            }
            Self::RetryExhausted { attempts } => write!(f, "RetryExhausted(attempts={})", attempts),
            Self::Disposed => f.write_str("Disposed"),
        }
    }
}

type ReadyFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// Discards every event. The default sink.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<DispatchEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: DispatchEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
    type SinkFuture = ReadyFuture;
}

/// Logs each event through `tracing` at INFO level.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<DispatchEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DispatchEvent) -> Self::Future {
        tracing::info!(category = event.category(), event = %event, "dispatch_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
    type SinkFuture = ReadyFuture;
}

/// Keeps events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<DispatchEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of events dropped to honor the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Count events matching `category`.
    pub fn count(&self, category: &str) -> usize {
        self.lock().iter().filter(|e| e.category() == category).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DispatchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<DispatchEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DispatchEvent) -> Self::Future {
        let mut events = self.lock();
        while events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
    type SinkFuture = ReadyFuture;
}
