//! Process-wide cap on how many requests start per second.
//!
//! Backed by a GCRA limiter: a full second's worth of requests may burst, after which slots
//! free up evenly across the second.
use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Reads the tokio clock so paused-time tests drive the limiter.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

pub struct RequestCeiling {
    max_per_second: NonZeroU32,
    limiter: Limiter,
}

impl fmt::Debug for RequestCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCeiling").field("max_per_second", &self.max_per_second).finish_non_exhaustive()
    }
}

impl RequestCeiling {
    /// Zero is treated as one request per second.
    pub fn new(max_per_second: u32) -> Self {
        let max_per_second = NonZeroU32::new(max_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            max_per_second,
            limiter: RateLimiter::direct_with_clock(Quota::per_second(max_per_second), TokioClock),
        }
    }

    /// Wait for a free slot and take it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tracing::trace!(wait = ?wait, "request ceiling reached");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot now, or report how long until one frees up.
    fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(TokioClock.now()).max(Duration::from_millis(1)))
    }
}
