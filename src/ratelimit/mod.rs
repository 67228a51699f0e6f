//! Rate limiting learned from server responses.
//!
//! Two layers of limits apply to every request that is not exempt:
//! - a process-wide [`GlobalGate`], closed by a global 429 and reopened when its cooldown ends;
//! - a per-route bucket, whose window (`limit`, `remaining`, `reset_after`) is learned from the
//!   headers parsed by [`headers::RateLimitHeaders`].
//!
//! An optional [`RequestCeiling`] caps requests per second on top of both. The
//! [`RateLimitStrategy`] owns all of it; nothing else mutates bucket or gate state.

pub mod bucket;
pub mod ceiling;
pub mod gate;
pub mod headers;
pub mod strategy;

pub use bucket::{BucketState, RateLimitBucketTable};
pub use ceiling::RequestCeiling;
pub use gate::GlobalGate;
pub use headers::RateLimitHeaders;
pub use strategy::{BucketTicket, RateLimitOutcome, RateLimitStrategy};
