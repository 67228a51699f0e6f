//! Outcome counters.
//!
//! Every outcome increments two counter sets: `lifetime`, which never resets, and `temporal`,
//! which a snapshot may zero. Both sets live behind one lock so a snapshot is a consistent
//! point-in-time copy and the copy-then-zero of `temporal` cannot lose or double-count an
//! increment.
use crate::error::HttpErrorKind;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counts per outcome category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: u64,
    pub bad_request: u64,
    pub unauthorized: u64,
    pub not_found: u64,
    pub too_large: u64,
    pub rate_limited: u64,
    pub server_error: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.success
            + self.bad_request
            + self.unauthorized
            + self.not_found
            + self.too_large
            + self.rate_limited
            + self.server_error
    }

    fn slot(&mut self, kind: Option<HttpErrorKind>) -> &mut u64 {
        match kind {
            None => &mut self.success,
            Some(HttpErrorKind::BadRequest) => &mut self.bad_request,
            Some(HttpErrorKind::Unauthorized) => &mut self.unauthorized,
            Some(HttpErrorKind::NotFound) => &mut self.not_found,
            Some(HttpErrorKind::RequestTooLarge) => &mut self.too_large,
            Some(HttpErrorKind::RateLimited) => &mut self.rate_limited,
            Some(HttpErrorKind::ServerError) => &mut self.server_error,
        }
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={} bad_request={} unauthorized={} not_found={} too_large={} rate_limited={} server_error={}",
            self.success,
            self.bad_request,
            self.unauthorized,
            self.not_found,
            self.too_large,
            self.rate_limited,
            self.server_error
        )
    }
}

/// Point-in-time copy of both counter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub lifetime: OutcomeCounts,
    /// Counts since the last resetting snapshot.
    pub temporal: OutcomeCounts,
}

#[derive(Debug, Default)]
struct Counters {
    lifetime: OutcomeCounts,
    temporal: OutcomeCounts,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one outcome; `None` is a success.
    pub fn record(&self, kind: Option<HttpErrorKind>) {
        let mut counters = self.lock();
        *counters.lifetime.slot(kind) += 1;
        *counters.temporal.slot(kind) += 1;
    }

    pub fn record_success(&self) {
        self.record(None);
    }

    pub fn record_bad_request(&self) {
        self.record(Some(HttpErrorKind::BadRequest));
    }

    pub fn record_unauthorized(&self) {
        self.record(Some(HttpErrorKind::Unauthorized));
    }

    pub fn record_not_found(&self) {
        self.record(Some(HttpErrorKind::NotFound));
    }

    pub fn record_too_large(&self) {
        self.record(Some(HttpErrorKind::RequestTooLarge));
    }

    pub fn record_rate_limited(&self) {
        self.record(Some(HttpErrorKind::RateLimited));
    }

    pub fn record_server_error(&self) {
        self.record(Some(HttpErrorKind::ServerError));
    }

    /// Copy both sets; with `reset_temporal`, zero the temporal set in the same step.
    pub fn snapshot(&self, reset_temporal: bool) -> MetricsSnapshot {
        let mut counters = self.lock();
        let snapshot = MetricsSnapshot { lifetime: counters.lifetime, temporal: counters.temporal };
        if reset_temporal {
            counters.temporal = OutcomeCounts::default();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_into_both_sets() {
        let metrics = MetricsCollector::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_not_found();
        metrics.record_server_error();

        let snapshot = metrics.snapshot(false);
        assert_eq!(snapshot.lifetime, snapshot.temporal);
        assert_eq!(snapshot.lifetime.success, 2);
        assert_eq!(snapshot.lifetime.not_found, 1);
        assert_eq!(snapshot.lifetime.server_error, 1);
        assert_eq!(snapshot.lifetime.total(), 4);
    }

    #[test]
    fn reset_zeroes_temporal_only() {
        let metrics = MetricsCollector::new();
        metrics.record_rate_limited();
        metrics.record_unauthorized();

        let first = metrics.snapshot(true);
        assert_eq!(first.temporal.total(), 2);

        let second = metrics.snapshot(true);
        assert_eq!(second.temporal, OutcomeCounts::default());
        assert_eq!(second.lifetime, first.lifetime);

        metrics.record_bad_request();
        let third = metrics.snapshot(false);
        assert_eq!(third.temporal.bad_request, 1);
        assert_eq!(third.lifetime.total(), 3);
    }

    #[test]
    fn concurrent_recorders_lose_nothing_across_resets() {
        let metrics = Arc::new(MetricsCollector::new());
        let recorders: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_success();
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while recorders.iter().any(|r| !r.is_finished()) {
            drained += metrics.snapshot(true).temporal.success;
        }
        for recorder in recorders {
            recorder.join().unwrap();
        }
        drained += metrics.snapshot(true).temporal.success;

        assert_eq!(drained, 8_000);
        assert_eq!(metrics.snapshot(false).lifetime.success, 8_000);
    }

    #[test]
    fn serializes_to_json() {
        let metrics = MetricsCollector::new();
        metrics.record_too_large();
        let json = serde_json::to_value(metrics.snapshot(false)).unwrap();
        assert_eq!(json["lifetime"]["too_large"], 1);
        assert_eq!(json["temporal"]["success"], 0);
    }
}
