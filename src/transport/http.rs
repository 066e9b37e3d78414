//! reqwest-backed transport.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::SET_COOKIE;

use super::{Exchange, TaskContext, Transport, WireRequest};
use crate::body::EncodedPayload;
use crate::error::Error;
use crate::headers::HeaderSet;
use crate::metrics::{FetchType, TransactionTimer};
use crate::security::TrustPolicy;

/// Transport over the platform HTTP engine. Engine-level redirect
/// following is disabled so the pipeline can apply its own policy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, Error> {
        Self::with_security(None)
    }

    /// Build the engine, applying a TLS trust policy when one is set.
    pub fn with_security(policy: Option<&TrustPolicy>) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(policy) = policy {
            builder = policy.apply(builder)?;
        }
        let client = builder
            .build()
            .map_err(|e| Error::Session(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing engine client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WireRequest, cx: &TaskContext) -> Result<Exchange, Error> {
        let mut timer = TransactionTimer::start(
            request.url.clone(),
            request.method.clone(),
            FetchType::Network,
        );

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout)
            .headers(request.headers.to_header_map()?);
        match &request.payload {
            EncodedPayload::Empty => {}
            EncodedPayload::Bytes(data) => builder = builder.body(data.clone()),
            // A fresh stream per attempt: the source is replayable.
            EncodedPayload::Stream(source) => builder = builder.body(source.to_transport_body()),
        }

        timer.request_sent();
        let response = tokio::select! {
            _ = cx.cancel.cancelled() => return Err(Error::Cancelled),
            result = builder.send() => result.map_err(Error::from)?,
        };
        timer.response_started();

        let protocol = match response.version() {
            reqwest::Version::HTTP_09 => Some("http/0.9".to_string()),
            reqwest::Version::HTTP_10 => Some("http/1.0".to_string()),
            reqwest::Version::HTTP_11 => Some("http/1.1".to_string()),
            reqwest::Version::HTTP_2 => Some("h2".to_string()),
            reqwest::Version::HTTP_3 => Some("h3".to_string()),
            _ => None,
        };
        let status = response.status();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        let headers = HeaderSet::from_header_map(response.headers());
        let body = Box::pin(response.bytes_stream().map_err(Error::from));

        Ok(Exchange {
            status,
            headers,
            set_cookies,
            body,
            timer,
            protocol,
        })
    }
}
