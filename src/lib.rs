#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # restgate
//!
//! Dispatch core for clients of rate-limited REST APIs.
//!
//! ## Features
//!
//! - **Learned rate limits**: per-route buckets discovered from response headers, with
//!   server-assigned bucket hashes shared across routes
//! - **Global gate** closed by global 429s and reopened when the cooldown ends
//! - **Retry** of rate-limit and transient transport outcomes, waiting exactly as long as the
//!   server asked
//! - **Typed errors** mapped from status codes, carrying the request and response
//! - **Outcome metrics** with lifetime and since-last-read counters
//! - **Tower integration**: the client is a `tower::Service<RestRequest>` and telemetry sinks
//!   are `tower::Service<DispatchEvent>`
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use http::StatusCode;
//! use restgate::{BuiltRequest, RawResponse, RestClient, RestConfig, RestRequest, Transport, TransportError};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Transport for Echo {
//!     async fn send(&self, request: BuiltRequest) -> Result<RawResponse, TransportError> {
//!         Ok(RawResponse::new(StatusCode::OK, request.url.into_bytes()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = RestClient::new(Echo, RestConfig::default()).unwrap();
//!     let response = client
//!         .execute(&RestRequest::get("GET /users/@me", "https://api.example.com/users/@me"))
//!         .await
//!         .unwrap();
//!     assert_eq!(response.status, StatusCode::OK);
//!     assert_eq!(client.metrics(false).lifetime.success, 1);
//!     client.dispose().await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod ratelimit;
pub mod request;
pub mod response;
pub mod retry;
pub mod telemetry;
pub mod trace;
pub mod transport;

// Re-exports
pub use client::{RestClient, RestClientBuilder};
pub use config::RestConfig;
pub use error::{ConfigError, HttpErrorKind, RestError, TransportError, TransportErrorKind};
pub use metrics::{MetricsCollector, MetricsSnapshot, OutcomeCounts};
pub use ratelimit::{BucketState, GlobalGate};
pub use request::{BuiltRequest, Exemption, RestRequest, Route};
pub use response::{RawResponse, RestResponse};
pub use retry::{Attempt, BuildError, RetryPolicy, RetryPolicyBuilder};
pub use telemetry::{DispatchEvent, LogSink, MemorySink, NullSink, TelemetrySink};
pub use trace::TraceId;
pub use transport::Transport;
