//! Request descriptors.
//!
//! A [`RestRequest`] is built once by the caller and handed to the client by reference. The
//! pipeline never mutates it; every send attempt materializes a fresh [`BuiltRequest`] from it.
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use std::sync::Arc;

/// Route identity used as the rate-limit bucket key.
///
/// This is the path template *before* parameter substitution, e.g.
/// `GET /channels/{channel_id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(Arc<str>);

impl Route {
    pub fn new(template: impl AsRef<str>) -> Self {
        Self(Arc::from(template.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Route {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Route {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Which rate-limit gates a request may skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exemption {
    /// Subject to the global gate, the request ceiling and its bucket.
    #[default]
    None,
    /// Skips the global gate and the request ceiling; still honors its bucket.
    Global,
    /// Skips every local gate. Only for calls the caller has already verified as safe.
    All,
}

impl Exemption {
    pub fn exempt_from_global(&self) -> bool {
        matches!(self, Self::Global | Self::All)
    }

    pub fn exempt_from_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// The wire form of a request for a single send attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Immutable description of an outbound call.
#[derive(Debug, Clone)]
pub struct RestRequest {
    route: Route,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Arc<[u8]>>,
    exemption: Exemption,
}

impl RestRequest {
    pub fn new(method: Method, route: impl Into<Route>, url: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            exemption: Exemption::None,
        }
    }

    pub fn get(route: impl Into<Route>, url: impl Into<String>) -> Self {
        Self::new(Method::GET, route, url)
    }

    pub fn post(route: impl Into<Route>, url: impl Into<String>) -> Self {
        Self::new(Method::POST, route, url)
    }

    pub fn delete(route: impl Into<Route>, url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, route, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(Arc::from(body.into()));
        self
    }

    /// Mark the request as exempt from the global limit.
    pub fn exempt_from_global_limit(mut self) -> Self {
        if self.exemption == Exemption::None {
            self.exemption = Exemption::Global;
        }
        self
    }

    /// Mark the request as exempt from every local limit.
    pub fn exempt_from_all_limits(mut self) -> Self {
        self.exemption = Exemption::All;
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn exemption(&self) -> Exemption {
        self.exemption
    }

    /// Materialize the wire request for one attempt.
    pub fn build(&self) -> BuiltRequest {
        BuiltRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.as_deref().map(<[u8]>::to_vec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn build_is_repeatable() {
        let request = RestRequest::post("POST /channels/{id}/messages", "https://x/channels/7/messages")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(br#"{"content":"hi"}"#.to_vec());

        let first = request.build();
        let second = request.build();
        assert_eq!(first, second);
        assert_eq!(first.method, Method::POST);
        assert_eq!(first.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(first.body.as_deref(), Some(&br#"{"content":"hi"}"#[..]));
    }

    #[test]
    fn exemption_flags() {
        let plain = RestRequest::get("r", "u");
        assert!(!plain.exemption().exempt_from_global());

        let global = RestRequest::get("r", "u").exempt_from_global_limit();
        assert!(global.exemption().exempt_from_global());
        assert!(!global.exemption().exempt_from_all());

        let all = RestRequest::get("r", "u").exempt_from_all_limits().exempt_from_global_limit();
        assert!(all.exemption().exempt_from_global());
        assert!(all.exemption().exempt_from_all());
    }

    #[test]
    fn route_identity_ignores_substitution() {
        let a = RestRequest::get("GET /guilds/{id}", "https://x/guilds/1");
        let b = RestRequest::get("GET /guilds/{id}", "https://x/guilds/2");
        assert_eq!(a.route(), b.route());
        assert_ne!(a.url(), b.url());
    }
}
