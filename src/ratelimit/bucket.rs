//! Learned per-route bucket state.
//!
//! Routes start out unknown. The first response for a route either teaches it a window
//! (`limit`/`remaining`/`reset_after`) or, when no rate-limit headers come back, marks it
//! unlimited. A server-assigned bucket hash folds several routes onto one shared bucket.
//!
//! Invariants:
//! - `remaining` only decreases inside a window. It is refilled to `limit` when `reset_at`
//!   passes, or overwritten by a fresh response.
//! - The most recently applied response wins; updates are applied under the bucket's lock in
//!   the order responses are received.
use super::headers::RateLimitHeaders;
use crate::request::Route;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Read-only view of one learned bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Requests per window; `None` for routes the server does not limit.
    pub limit: Option<u32>,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends, if known.
    pub reset_at: Option<Instant>,
    /// Window length as last reported by the server.
    pub reset_after: Option<Duration>,
}

impl BucketState {
    /// A route whose responses carry no rate-limit metadata.
    pub fn unlimited() -> Self {
        Self { limit: None, remaining: 0, reset_at: None, reset_after: None }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit.is_none() && self.reset_at.is_none()
    }

    /// Refill once the window has passed and open the next one.
    ///
    /// A refill always grants at least one request so the server can report the new window.
    fn roll_window(&mut self, now: Instant) {
        if matches!(self.reset_at, Some(reset_at) if now >= reset_at) {
            self.remaining = self.limit.unwrap_or(0).max(1);
            self.reset_at = self.reset_after.map(|reset_after| now + reset_after);
        }
    }

    /// Take one request from the window, or report when the window ends.
    fn try_take(&mut self, now: Instant) -> Result<(), Instant> {
        self.roll_window(now);
        if self.is_unlimited() {
            return Ok(());
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(());
        }
        match self.reset_at {
            Some(reset_at) => Err(reset_at),
            // Exhausted with no known reset: let the server decide.
            None => Ok(()),
        }
    }

    fn apply(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining;
            if self.limit.is_none() {
                self.limit = Some(remaining);
            }
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_after = Some(reset_after);
            self.reset_at = Some(now + reset_after);
        }
    }

    fn exhaust_until(&mut self, deadline: Instant) {
        self.remaining = 0;
        self.reset_at = Some(match self.reset_at {
            Some(current) if current > deadline => current,
            _ => deadline,
        });
    }
}

/// Result of asking a bucket for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Send now.
    Granted,
    /// Send now as one of the requests teaching this bucket its limits.
    Learning,
    /// The window is exhausted until the given instant.
    WaitUntil(Instant),
    /// The bucket is unknown and enough learners are already in flight.
    AwaitLearn,
}

/// One bucket and its critical section.
#[derive(Debug)]
pub(crate) struct Bucket {
    hash: Option<String>,
    state: Mutex<Option<BucketState>>,
    learners: AtomicUsize,
    learned: Notify,
}

impl Bucket {
    fn new(hash: Option<String>) -> Self {
        Self { hash, state: Mutex::new(None), learners: AtomicUsize::new(0), learned: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, Option<BucketState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub(crate) fn snapshot(&self) -> Option<BucketState> {
        *self.lock()
    }

    pub(crate) fn admit(&self, now: Instant, max_learners: usize) -> Admission {
        let mut state = self.lock();
        match state.as_mut() {
            Some(known) => match known.try_take(now) {
                Ok(()) => Admission::Granted,
                Err(reset_at) => Admission::WaitUntil(reset_at),
            },
            None => {
                let in_flight = self.learners.load(Ordering::Acquire);
                if in_flight < max_learners {
                    self.learners.fetch_add(1, Ordering::AcqRel);
                    Admission::Learning
                } else {
                    Admission::AwaitLearn
                }
            }
        }
    }

    /// Future that resolves the next time this bucket learns something or a learner leaves.
    ///
    /// Create it *before* calling [`Bucket::admit`] so no wakeup is missed in between.
    pub(crate) fn learned(&self) -> tokio::sync::futures::Notified<'_> {
        self.learned.notified()
    }

    pub(crate) fn finish_learning(&self) {
        self.learners.fetch_sub(1, Ordering::AcqRel);
        self.learned.notify_waiters();
    }

    pub(crate) fn apply(&self, headers: &RateLimitHeaders, now: Instant) {
        {
            let mut state = self.lock();
            state.get_or_insert_with(BucketState::unlimited).apply(headers, now);
        }
        self.learned.notify_waiters();
    }

    /// Learn the route as unlimited unless something else already taught it.
    pub(crate) fn mark_unlimited(&self) {
        {
            let mut state = self.lock();
            if state.is_none() {
                *state = Some(BucketState::unlimited());
            }
        }
        self.learned.notify_waiters();
    }

    pub(crate) fn exhaust_until(&self, deadline: Instant) {
        {
            let mut state = self.lock();
            state.get_or_insert_with(BucketState::unlimited).exhaust_until(deadline);
        }
        self.learned.notify_waiters();
    }

    /// Wake anyone parked on this bucket so they re-resolve their route.
    pub(crate) fn wake_all(&self) {
        self.learned.notify_waiters();
    }
}

/// Maps route identity to bucket state. Owned by the rate-limit strategy.
#[derive(Debug, Default)]
pub struct RateLimitBucketTable {
    routes: DashMap<Route, Arc<Bucket>>,
    hashes: DashMap<String, Arc<Bucket>>,
}

impl RateLimitBucketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket currently serving `route`, created unknown on first sight.
    pub(crate) fn bucket_for(&self, route: &Route) -> Arc<Bucket> {
        if let Some(bucket) = self.routes.get(route) {
            return bucket.clone();
        }
        self.routes.entry(route.clone()).or_insert_with(|| Arc::new(Bucket::new(None))).clone()
    }

    /// Point `route` at the shared bucket for `hash`.
    pub(crate) fn bind_hash(&self, route: &Route, hash: &str) -> Arc<Bucket> {
        let current = self.bucket_for(route);
        if current.hash() == Some(hash) {
            return current;
        }
        let shared = self
            .hashes
            .entry(hash.to_owned())
            .or_insert_with(|| Arc::new(Bucket::new(Some(hash.to_owned()))))
            .clone();
        self.routes.insert(route.clone(), shared.clone());
        tracing::debug!(route = %route, bucket = hash, "route bound to bucket hash");
        current.wake_all();
        shared
    }

    /// Copy of the state serving `route`, if it has been learned.
    pub fn state(&self, route: &Route) -> Option<BucketState> {
        self.routes.get(route).and_then(|bucket| bucket.snapshot())
    }

    /// Bucket hash learned for `route`.
    pub fn hash_of(&self, route: &Route) -> Option<String> {
        self.routes.get(route).and_then(|bucket| bucket.hash().map(str::to_owned))
    }

    /// Number of routes seen.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Forget everything, waking any parked waiters.
    pub fn clear(&self) {
        for entry in self.routes.iter() {
            entry.value().wake_all();
        }
        self.routes.clear();
        self.hashes.clear();
    }
}
