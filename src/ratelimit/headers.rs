//! Rate-limit metadata carried on response headers.
//!
//! Recognized headers (names are case-insensitive):
//! - `X-RateLimit-Limit`: requests per window
//! - `X-RateLimit-Remaining`: requests left in the current window
//! - `X-RateLimit-Reset-After`: seconds until the window resets, fractional allowed
//! - `X-RateLimit-Bucket`: server-assigned bucket hash shared by routes
//! - `X-RateLimit-Global`: `true` when a 429 applies to every route
//! - `X-RateLimit-Scope`: `global` is treated like the global flag; `user`/`shared` are per-route
//! - `Retry-After`: seconds to wait after a 429
//!
//! Values that fail to parse are treated as absent.
use http::HeaderMap;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const SCOPE: &str = "x-ratelimit-scope";
pub const RETRY_AFTER: &str = "retry-after";

/// Everything the strategy can learn from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub bucket: Option<String>,
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        let scope_is_global = header_str(headers, SCOPE)
            .map(|scope| scope.eq_ignore_ascii_case("global"))
            .unwrap_or(false);
        let global_flag = header_str(headers, GLOBAL)
            .map(|flag| flag.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            limit: header_str(headers, LIMIT).and_then(|v| v.parse().ok()),
            remaining: header_str(headers, REMAINING).and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, RESET_AFTER).and_then(parse_seconds),
            bucket: header_str(headers, BUCKET).filter(|v| !v.is_empty()).map(str::to_owned),
            global: global_flag || scope_is_global,
            retry_after: header_str(headers, RETRY_AFTER).and_then(parse_seconds),
        }
    }

    /// True when the response describes a bucket window.
    pub fn has_bucket_window(&self) -> bool {
        self.remaining.is_some() && self.reset_after.is_some()
    }

    /// Wait suggested by a 429: `Retry-After` first, then the bucket reset.
    pub fn cooldown(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_after)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Parse non-negative, finite, possibly fractional seconds.
fn parse_seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}
