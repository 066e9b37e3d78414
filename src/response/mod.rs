//! Response Model
//!
//! A [`Response`] exists for every executed request, including transport
//! failures: in that case `status` is `None` and `error` carries the
//! failure. The body lives in memory or in a spool file depending on the
//! request's transfer mode.

use std::path::PathBuf;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::headers::HeaderSet;
use crate::metrics::Metrics;

/// Where the resolved response body lives.
#[derive(Debug, Clone)]
pub enum BodyLocation {
    InMemory(Bytes),
    Spool(PathBuf),
}

impl Default for BodyLocation {
    fn default() -> Self {
        Self::InMemory(Bytes::new())
    }
}

/// Outcome of one logical request.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status; `None` when the exchange never produced one.
    pub status: Option<StatusCode>,
    pub headers: HeaderSet,
    pub body: BodyLocation,
    /// Populated when the transport failed or the validator chain deemed
    /// the response a failure.
    pub error: Option<Error>,
    pub metrics: Metrics,
    pub request_id: Uuid,
    /// URL of the original wire request.
    pub original_url: Option<Url>,
    /// URL of the last wire request, after redirects.
    pub final_url: Option<Url>,
}

impl Response {
    /// A response describing a failure that produced no exchange.
    pub(crate) fn failure(request_id: Uuid, error: Error, metrics: Metrics) -> Self {
        Self {
            status: None,
            error: Some(error),
            metrics,
            request_id,
            ..Default::default()
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn redirect_count(&self) -> u32 {
        self.metrics.redirect_count
    }

    /// Body bytes. Spooled bodies are read back from disk.
    pub fn bytes(&self) -> Result<Bytes, Error> {
        match &self.body {
            BodyLocation::InMemory(data) => Ok(data.clone()),
            BodyLocation::Spool(path) => Ok(Bytes::from(std::fs::read(path)?)),
        }
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, Error> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::InvalidResponse(format!("body is not valid UTF-8: {e}")))
    }

    /// Decode the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ObjectDecode(e.to_string()))
    }

    /// Decode the body as a raw JSON value.
    pub fn decode_json(&self) -> Result<serde_json::Value, Error> {
        self.decode()
    }
}
