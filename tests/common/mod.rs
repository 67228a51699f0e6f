#![allow(dead_code)]

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use restgate::{BuiltRequest, RawResponse, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted = Result<RawResponse, TransportError>;

/// Route pipeline logs to the test harness; run with `--nocapture` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Transport that replays scripted outcomes per URL and answers `200 OK` once a script runs dry.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<BuiltRequest>>,
    latency: Duration,
    fail_close: bool,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn script(&self, url: &str, response: RawResponse) -> &Self {
        self.push(url, Ok(response))
    }

    pub fn script_err(&self, url: &str, err: TransportError) -> &Self {
        self.push(url, Err(err))
    }

    fn push(&self, url: &str, outcome: Scripted) -> &Self {
        self.scripts.lock().unwrap().entry(url.to_owned()).or_default().push_back(outcome);
        self
    }

    pub fn sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_to(&self, url: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    pub fn last_sent(&self) -> Option<BuiltRequest> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: BuiltRequest) -> Result<RawResponse, TransportError> {
        let url = request.url.clone();
        self.sent.lock().unwrap().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.scripts.lock().unwrap().get_mut(&url).and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(ok()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(TransportError::other("socket already gone"))
        } else {
            Ok(())
        }
    }
}

pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    map
}

pub fn ok() -> RawResponse {
    status(200)
}

pub fn status(code: u16) -> RawResponse {
    RawResponse::new(StatusCode::from_u16(code).unwrap(), format!("status {code}").into_bytes())
}

pub fn with_headers(code: u16, pairs: &[(&str, &str)]) -> RawResponse {
    status(code).with_headers(headers(pairs))
}

/// A success that leaves the route's bucket with `remaining` requests for `reset_after` seconds.
pub fn window(limit: u32, remaining: u32, reset_after: f64) -> RawResponse {
    let (limit, remaining, reset_after) = (limit.to_string(), remaining.to_string(), reset_after.to_string());
    with_headers(
        200,
        &[
            ("X-RateLimit-Limit", limit.as_str()),
            ("X-RateLimit-Remaining", remaining.as_str()),
            ("X-RateLimit-Reset-After", reset_after.as_str()),
        ],
    )
}

/// A 429 scoped to the route's bucket.
pub fn route_limited(retry_after: f64) -> RawResponse {
    let retry_after = retry_after.to_string();
    with_headers(429, &[("Retry-After", retry_after.as_str()), ("X-RateLimit-Scope", "user")])
}

/// A 429 scoped to every route.
pub fn global_limited(retry_after: f64) -> RawResponse {
    let retry_after = retry_after.to_string();
    with_headers(429, &[("Retry-After", retry_after.as_str()), ("X-RateLimit-Global", "true")])
}
