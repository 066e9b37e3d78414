//! Transport Adapter
//!
//! [`Transport`] is the seam between the pipeline and the HTTP engine: it
//! receives a fully materialized [`WireRequest`] and returns an
//! [`Exchange`] whose body is still streaming. The stub engine sits ahead
//! of this seam and synthesizes byte-equivalent exchanges; everything
//! downstream (buffering, metrics, redirects, validation) is shared.

mod http;

pub use http::HttpTransport;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::{Method, StatusCode};
use url::Url;
use uuid::Uuid;

use crate::body::EncodedPayload;
use crate::client::CachePolicy;
use crate::error::Error;
use crate::headers::HeaderSet;
use crate::metrics::TransactionTimer;
use crate::utils::cancel::CancelHandle;

/// The materialized request handed to the transport: absolute URL, merged
/// headers, serialized body, resolved policies.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub id: Uuid,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderSet,
    pub payload: EncodedPayload,
    pub timeout: Duration,
    pub cache_policy: CachePolicy,
}

impl WireRequest {
    /// In-memory body bytes, when the payload has them.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.payload.as_bytes()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }
}

/// Per-task state threaded through a single transport dispatch.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub request_id: Uuid,
    pub cancel: CancelHandle,
}

/// Streaming response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// A response with headers received and the body still in flight.
pub struct Exchange {
    pub status: StatusCode,
    pub headers: HeaderSet,
    /// Every `Set-Cookie` value of the response, before duplicate names
    /// collapse in the header set.
    pub set_cookies: Vec<String>,
    pub body: BodyStream,
    /// Open transaction timer; the pipeline closes it once the body is
    /// drained.
    pub timer: TransactionTimer,
    pub protocol: Option<String>,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("status", &self.status)
            .field("headers", &self.headers.len())
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// The contract between the pipeline and the HTTP engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one wire request and return the streaming exchange. Redirects
    /// are not followed here; the pipeline owns the redirect loop.
    async fn send(&self, request: &WireRequest, cx: &TaskContext) -> Result<Exchange, Error>;
}
