//! Stub responses and responders
//!
//! A [`StubResponse`] declares what a matched request receives: status,
//! headers, body (inline bytes or a file), an optional delivery delay, or
//! an outright failure. [`StubResponder`] allows per-request
//! specialization; [`EchoResponder`] mirrors the incoming request back.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

use crate::error::Error;
use crate::headers::HeaderSet;
use crate::transport::WireRequest;

/// Body of a synthesized response.
#[derive(Debug, Clone, Default)]
pub enum StubBody {
    #[default]
    Empty,
    Bytes(Bytes),
    File(PathBuf),
}

/// A declarative synthesized response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: StatusCode,
    pub headers: HeaderSet,
    pub body: StubBody,
    /// Delivery is postponed by this interval; the wait is cancellable.
    pub delay: Option<Duration>,
    /// When set, the task completes with this error instead of a response.
    pub error: Option<Error>,
}

impl Default for StubResponse {
    fn default() -> Self {
        Self::ok()
    }
}

impl StubResponse {
    /// Empty 200 response.
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderSet::new(),
            body: StubBody::Empty,
            delay: None,
            error: None,
        }
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::ok()
        }
    }

    /// JSON response body.
    pub fn json(value: serde_json::Value) -> Self {
        let data = serde_json::to_vec(&value).unwrap_or_default();
        Self::ok()
            .header("Content-Type", "application/json; charset=utf-8")
            .body_bytes(data)
    }

    /// Plain text response body.
    pub fn text(content: impl Into<String>) -> Self {
        Self::ok()
            .header("Content-Type", "text/plain; charset=utf-8")
            .body_bytes(content.into().into_bytes())
    }

    /// Raw bytes with an explicit content type.
    pub fn bytes(content_type: &str, data: impl Into<Bytes>) -> Self {
        Self::ok()
            .header("Content-Type", content_type)
            .body_bytes(data)
    }

    /// Body read from a file at delivery time.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let mut response = Self::ok();
        response.body = StubBody::File(path.into());
        response
    }

    /// A 301 redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::with_status(StatusCode::MOVED_PERMANENTLY).header("Location", location)
    }

    /// Complete the task with an error instead of a response.
    pub fn failure(error: Error) -> Self {
        let mut response = Self::ok();
        response.error = Some(error);
        response
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body_bytes(mut self, data: impl Into<Bytes>) -> Self {
        self.body = StubBody::Bytes(data.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Resolve the body to bytes. File bodies read from disk here.
    pub(crate) fn resolve_body(&self) -> Result<Bytes, Error> {
        match &self.body {
            StubBody::Empty => Ok(Bytes::new()),
            StubBody::Bytes(data) => Ok(data.clone()),
            StubBody::File(path) => Ok(Bytes::from(std::fs::read(path)?)),
        }
    }
}

/// Computes the effective response for a matched request.
pub trait StubResponder: Send + Sync {
    fn adapt(&self, request: &WireRequest) -> StubResponse;
}

/// A fixed response is its own responder.
impl StubResponder for StubResponse {
    fn adapt(&self, _request: &WireRequest) -> StubResponse {
        self.clone()
    }
}

/// Mirrors the incoming request: method and URL as headers, the request
/// body (and its content type) as the response body.
#[derive(Debug, Clone, Default)]
pub struct EchoResponder;

impl StubResponder for EchoResponder {
    fn adapt(&self, request: &WireRequest) -> StubResponse {
        let mut response = StubResponse::ok()
            .header("X-Echo-Method", request.method.as_str())
            .header("X-Echo-Url", request.url.as_str());
        if let Some(content_type) = request.header("content-type") {
            response = response.header("Content-Type", content_type.to_string());
        }
        if let Some(body) = request.body_bytes() {
            response = response.body_bytes(body.clone());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::EncodedPayload;
    use crate::client::CachePolicy;
    use url::Url;
    use uuid::Uuid;

    fn wire(url: &str, body: Option<&'static [u8]>) -> WireRequest {
        WireRequest {
            id: Uuid::new_v4(),
            method: reqwest::Method::POST,
            url: Url::parse(url).unwrap(),
            headers: [("Content-Type", "application/json")].into_iter().collect(),
            payload: body
                .map(|b| EncodedPayload::Bytes(Bytes::from_static(b)))
                .unwrap_or_default(),
            timeout: std::time::Duration::from_secs(5),
            cache_policy: CachePolicy::Default,
        }
    }

    #[test]
    fn json_stub_sets_content_type() {
        let stub = StubResponse::json(serde_json::json!({"ok": true}));
        assert_eq!(
            stub.headers.get("content-type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(stub.resolve_body().unwrap().as_ref(), br#"{"ok":true}"#);
    }

    #[test]
    fn redirect_stub_carries_location() {
        let stub = StubResponse::redirect("/new");
        assert_eq!(stub.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(stub.headers.location(), Some("/new"));
    }

    #[test]
    fn echo_mirrors_method_url_and_body() {
        let request = wire("https://api.test/echo", Some(br#"{"ping":1}"#));
        let stub = EchoResponder.adapt(&request);
        assert_eq!(stub.headers.get("x-echo-method"), Some("POST"));
        assert_eq!(stub.headers.get("x-echo-url"), Some("https://api.test/echo"));
        assert_eq!(stub.headers.get("content-type"), Some("application/json"));
        assert_eq!(stub.resolve_body().unwrap().as_ref(), br#"{"ping":1}"#);
    }

    #[test]
    fn file_body_reads_at_delivery() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        tmp.write_all(b"from disk").unwrap();
        let stub = StubResponse::file(tmp.path());
        assert_eq!(stub.resolve_body().unwrap().as_ref(), b"from disk");
    }
}
