//! Response types on both sides of the pipeline.
use http::{HeaderMap, StatusCode};

/// What the transport hands back for one send.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Body as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Successful result of [`RestClient::execute`](crate::RestClient::execute).
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl From<RawResponse> for RestResponse {
    fn from(raw: RawResponse) -> Self {
        Self { status: raw.status, body: raw.body }
    }
}

impl RestResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_decodes() {
        #[derive(serde::Deserialize)]
        struct Channel {
            id: u64,
        }
        let response: RestResponse =
            RawResponse::new(StatusCode::OK, br#"{"id":42}"#.to_vec()).into();
        let channel: Channel = response.json().unwrap();
        assert_eq!(channel.id, 42);
    }

    #[test]
    fn text_is_lossy() {
        let raw = RawResponse::new(StatusCode::OK, vec![b'o', b'k', 0xff]);
        assert!(raw.text().starts_with("ok"));
    }
}
