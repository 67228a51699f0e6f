//! Admission control before a send, state learning after it.
//!
//! Before a send ([`RateLimitStrategy::acquire`]):
//! 1. Requests exempt from all limits pass immediately.
//! 2. Everything else not exempt from the global limit waits for the [`GlobalGate`].
//! 3. The route's bucket is consulted. A known, exhausted bucket suspends the request until
//!    its window resets. An unknown bucket lets a bounded number of learners through and parks
//!    the rest until the first response arrives or the learning grace period runs out.
//! 4. The per-second request ceiling, if configured, is applied last.
//!
//! After a send ([`RateLimitStrategy::complete`]) the response headers overwrite the bucket.
//! A 429 closes the global gate or exhausts the bucket, and yields
//! [`RateLimitOutcome::RetryAfter`] so the retry layer knows how long to wait.
use super::bucket::{Admission, Bucket, BucketState, RateLimitBucketTable};
use super::ceiling::RequestCeiling;
use super::gate::GlobalGate;
use super::headers::RateLimitHeaders;
use crate::config::RestConfig;
use crate::error::RestError;
use crate::request::{Exemption, Route};
use crate::response::RawResponse;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// What the retry layer should do with a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// The response is final as far as rate limiting is concerned.
    Proceed,
    /// The server rejected the request; wait `wait` before trying again.
    RetryAfter { wait: Duration, global: bool },
}

/// Proof of admission for one send attempt.
///
/// Dropping a learner's ticket frees its learning slot and wakes parked requests.
#[derive(Debug)]
pub struct BucketTicket {
    route: Route,
    bucket: Option<Arc<Bucket>>,
    learning: bool,
    waited: Duration,
}

impl BucketTicket {
    /// Whether this attempt is teaching an unknown bucket its limits.
    pub fn is_learning(&self) -> bool {
        self.learning
    }

    /// Time spent suspended on the gate, the bucket or the ceiling.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for BucketTicket {
    fn drop(&mut self) {
        if self.learning {
            if let Some(bucket) = &self.bucket {
                bucket.finish_learning();
            }
        }
    }
}

#[derive(Debug)]
pub struct RateLimitStrategy {
    table: RateLimitBucketTable,
    gate: Arc<GlobalGate>,
    ceiling: Option<RequestCeiling>,
    learning_grace: Duration,
    max_learners: usize,
    retry_fallback: Duration,
    global_fallback: Duration,
}

impl RateLimitStrategy {
    pub fn new(config: &RestConfig, gate: Arc<GlobalGate>) -> Self {
        Self {
            table: RateLimitBucketTable::new(),
            gate,
            ceiling: config.max_requests_per_second.map(RequestCeiling::new),
            learning_grace: config.route_learning_grace,
            max_learners: config.max_unlearned_in_flight.max(1),
            retry_fallback: config.retry_fallback_delay,
            global_fallback: config.global_fallback_delay,
        }
    }

    pub fn gate(&self) -> &Arc<GlobalGate> {
        &self.gate
    }

    /// Copy of the learned state for `route`.
    pub fn bucket_state(&self, route: &Route) -> Option<BucketState> {
        self.table.state(route)
    }

    /// Bucket hash the server assigned to `route`.
    pub fn bucket_hash(&self, route: &Route) -> Option<String> {
        self.table.hash_of(route)
    }

    /// Wait until a request to `route` may be sent.
    pub async fn acquire(&self, route: &Route, exemption: Exemption) -> Result<BucketTicket, RestError> {
        if self.gate.is_disposed() {
            return Err(RestError::Disposed);
        }
        let started = Instant::now();
        if exemption.exempt_from_all() {
            return Ok(BucketTicket { route: route.clone(), bucket: None, learning: false, waited: Duration::ZERO });
        }

        let mut learn_deadline: Option<Instant> = None;
        let (bucket, learning) = loop {
            if !exemption.exempt_from_global() {
                self.gate.wait_until_open().await?;
            }
            if self.gate.is_disposed() {
                return Err(RestError::Disposed);
            }

            let bucket = self.table.bucket_for(route);
            let learned = bucket.learned();
            let now = Instant::now();
            match bucket.admit(now, self.max_learners) {
                Admission::Granted => {
                    drop(learned);
                    break (bucket, false);
                }
                Admission::Learning => {
                    drop(learned);
                    break (bucket, true);
                }
                Admission::WaitUntil(reset_at) => {
                    tracing::debug!(
                        route = %route,
                        wait = ?reset_at.saturating_duration_since(now),
                        "bucket exhausted, waiting for reset"
                    );
                    drop(learned);
                    sleep_until(reset_at).await;
                }
                Admission::AwaitLearn => {
                    let deadline = *learn_deadline.get_or_insert(now + self.learning_grace);
                    if now >= deadline {
                        tracing::debug!(route = %route, "learning grace elapsed, sending unthrottled");
                        drop(learned);
                        break (bucket, false);
                    }
                    tokio::select! {
                        _ = learned => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
            }
        };

        let mut ticket =
            BucketTicket { route: route.clone(), bucket: Some(bucket), learning, waited: Duration::ZERO };

        if !exemption.exempt_from_global() {
            if let Some(ceiling) = &self.ceiling {
                ceiling.acquire().await;
            }
        }

        ticket.waited = started.elapsed();
        Ok(ticket)
    }

    /// Learn from a response and decide whether the attempt must be retried.
    pub fn complete(&self, ticket: BucketTicket, response: &RawResponse) -> RateLimitOutcome {
        let headers = RateLimitHeaders::parse(&response.headers);
        let now = Instant::now();
        let route = ticket.route.clone();
        let rate_limited = response.status == StatusCode::TOO_MANY_REQUESTS;

        let bucket = match &headers.bucket {
            Some(hash) => self.table.bind_hash(&route, hash),
            None => self.table.bucket_for(&route),
        };
        if headers.has_bucket_window() {
            bucket.apply(&headers, now);
        } else if !rate_limited {
            bucket.mark_unlimited();
        }
        drop(ticket);

        if !rate_limited {
            return RateLimitOutcome::Proceed;
        }

        if headers.global {
            let wait = headers.cooldown().unwrap_or(self.global_fallback);
            tracing::warn!(
                category = "global_rate_limit",
                route = %route,
                wait = ?wait,
                "global rate limit hit, closing gate"
            );
            self.gate.close_until(now + wait);
            RateLimitOutcome::RetryAfter { wait, global: true }
        } else {
            let wait = headers.cooldown().unwrap_or(self.retry_fallback);
            tracing::warn!(
                category = "bucket_rate_limit",
                route = %route,
                bucket = headers.bucket.as_deref().unwrap_or("-"),
                wait = ?wait,
                "bucket rate limit hit"
            );
            bucket.exhaust_until(now + wait);
            RateLimitOutcome::RetryAfter { wait, global: false }
        }
    }

    /// Drop all learned state and wake anything parked on a bucket.
    pub fn dispose(&self) {
        self.table.clear();
    }
}
