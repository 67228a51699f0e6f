//! The boundary to the underlying HTTP stack.
//!
//! The pipeline only needs to send a prepared request and read back status, headers and
//! body. Connection pooling and authentication belong to implementations of this trait.
use crate::error::TransportError;
use crate::request::BuiltRequest;
use crate::response::RawResponse;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the server's response.
    async fn send(&self, request: BuiltRequest) -> Result<RawResponse, TransportError>;

    /// Release transport resources. Called once from `RestClient::dispose`.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<T> Transport for std::sync::Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, request: BuiltRequest) -> Result<RawResponse, TransportError> {
        (**self).send(request).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
