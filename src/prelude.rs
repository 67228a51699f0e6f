//! Convenient re-exports for common restgate types.
pub use crate::{
    client::{RestClient, RestClientBuilder},
    config::RestConfig,
    error::{HttpErrorKind, RestError, TransportError},
    request::{Exemption, RestRequest, Route},
    response::{RawResponse, RestResponse},
    telemetry::{DispatchEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    transport::Transport,
    BuiltRequest,
};
