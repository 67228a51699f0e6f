//! Client configuration.
//!
//! The values come from an external source (a JSON document, environment, CLI); the client
//! only consumes them. Durations serialize as human-readable strings such as `"250ms"`.
//!
//! ```rust
//! use restgate::RestConfig;
//! use std::time::Duration;
//!
//! let config = RestConfig::from_json_str(r#"{ "request_timeout": "10s", "max_retry_attempts": 4 }"#)
//!     .unwrap();
//! assert_eq!(config.request_timeout, Duration::from_secs(10));
//! assert_eq!(config.max_retry_attempts, Some(4));
//! assert_eq!(config.max_requests_per_second, Some(50));
//! ```
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);
const DEFAULT_RETRY_FALLBACK_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_ROUTE_LEARNING_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_MAX_UNLEARNED_IN_FLIGHT: usize = 1;
const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 50;
const DEFAULT_GLOBAL_FALLBACK_DELAY: Duration = Duration::from_secs(1);

/// Settings for a [`RestClient`](crate::RestClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestConfig {
    /// Timeout for a single transport send.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Total attempts per call (initial + retries). `None` retries without bound.
    pub max_retry_attempts: Option<usize>,

    /// Delay before retrying when the server gave no reset hint.
    #[serde(with = "humantime_serde")]
    pub retry_fallback_delay: Duration,

    /// How long extra requests to a not-yet-learned route wait for its first response.
    #[serde(with = "humantime_serde")]
    pub route_learning_grace: Duration,

    /// Requests allowed in flight to an unlearned route before the grace wait kicks in.
    pub max_unlearned_in_flight: usize,

    /// Process-wide ceiling on requests started per second. `None` disables it.
    pub max_requests_per_second: Option<u32>,

    /// Global cooldown used when a global 429 carries no timing header.
    #[serde(with = "humantime_serde")]
    pub global_fallback_delay: Duration,

    /// Replace request/response bodies with their length in trace logs.
    pub anonymize_payloads: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retry_attempts: None,
            retry_fallback_delay: DEFAULT_RETRY_FALLBACK_DELAY,
            route_learning_grace: DEFAULT_ROUTE_LEARNING_GRACE,
            max_unlearned_in_flight: DEFAULT_MAX_UNLEARNED_IN_FLIGHT,
            max_requests_per_second: Some(DEFAULT_MAX_REQUESTS_PER_SECOND),
            global_fallback_delay: DEFAULT_GLOBAL_FALLBACK_DELAY,
            anonymize_payloads: false,
        }
    }
}

impl RestConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "request_timeout" });
        }
        if self.max_retry_attempts == Some(0) {
            return Err(ConfigError::MustBePositive { field: "max_retry_attempts" });
        }
        if self.max_unlearned_in_flight == 0 {
            return Err(ConfigError::MustBePositive { field: "max_unlearned_in_flight" });
        }
        if self.max_requests_per_second == Some(0) {
            return Err(ConfigError::MustBePositive { field: "max_requests_per_second" });
        }
        Ok(())
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: usize) -> Self {
        self.max_retry_attempts = Some(attempts);
        self
    }

    pub fn with_retry_fallback_delay(mut self, delay: Duration) -> Self {
        self.retry_fallback_delay = delay;
        self
    }

    pub fn with_route_learning_grace(mut self, grace: Duration) -> Self {
        self.route_learning_grace = grace;
        self
    }

    pub fn with_max_unlearned_in_flight(mut self, limit: usize) -> Self {
        self.max_unlearned_in_flight = limit;
        self
    }

    pub fn with_max_requests_per_second(mut self, ceiling: Option<u32>) -> Self {
        self.max_requests_per_second = ceiling;
        self
    }

    pub fn with_global_fallback_delay(mut self, delay: Duration) -> Self {
        self.global_fallback_delay = delay;
        self
    }

    pub fn with_anonymized_payloads(mut self, anonymize: bool) -> Self {
        self.anonymize_payloads = anonymize;
        self
    }
}
