//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use wiretap::error::{Error, TransportErrorKind};
use wiretap::headers::HeaderSet;
use wiretap::metrics::{FetchType, TransactionTimer};
use wiretap::transport::{Exchange, TaskContext, Transport, WireRequest};

/// Build a finished in-memory exchange with the given status and body.
pub fn canned_exchange(request: &WireRequest, status: u16, body: &str) -> Exchange {
    let mut timer = TransactionTimer::start(
        request.url.clone(),
        request.method.clone(),
        FetchType::Network,
    );
    timer.request_sent();
    timer.response_started();
    let mut headers = HeaderSet::new();
    headers.set("Content-Type", "text/plain; charset=utf-8");
    headers.set("Content-Length", body.len().to_string());
    let chunks: Vec<Result<Bytes, Error>> = if body.is_empty() {
        Vec::new()
    } else {
        vec![Ok(Bytes::from(body.to_string()))]
    };
    Exchange {
        status: reqwest::StatusCode::from_u16(status).unwrap(),
        headers,
        set_cookies: Vec::new(),
        body: Box::pin(stream::iter(chunks)),
        timer,
        protocol: Some("http/1.1".to_string()),
    }
}

/// Transport failing the first `fail_times` attempts with a transient
/// error, then answering 200 with a fixed body.
pub struct FlakyTransport {
    pub attempts: AtomicU32,
    fail_times: u32,
    body: &'static str,
}

impl FlakyTransport {
    pub fn new(fail_times: u32, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            fail_times,
            body,
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, request: &WireRequest, _cx: &TaskContext) -> Result<Exchange, Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            return Err(Error::transport(
                TransportErrorKind::TimedOut,
                "simulated timeout",
            ));
        }
        Ok(canned_exchange(request, 200, self.body))
    }
}
