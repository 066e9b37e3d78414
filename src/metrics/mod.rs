//! Metrics Collector
//!
//! One [`Transaction`] is recorded per physical transport attempt,
//! including retried attempts and every redirect hop. Each transaction
//! holds a set of timed [`Stage`]s; the `Server` stage is synthesized as
//! the gap between the end of the request stage and the first response
//! byte.

use chrono::{DateTime, Utc};
use reqwest::Method;
use url::Url;

/// The timed phases of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    DomainLookup,
    Connect,
    SecureConnect,
    Request,
    /// Synthesized: end of request to start of response.
    Server,
    Response,
    Total,
}

/// A named time interval within a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub kind: StageKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Stage {
    fn new(kind: StageKind, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        // Intervals are kept well-formed even when clock reads race.
        let end = end.max(start);
        Self { kind, start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// How the resource was fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchType {
    #[default]
    Unknown,
    Network,
    ServerPush,
    /// Also used for stub-synthesized responses, which never hit the wire.
    LocalCache,
}

/// One request/response round trip.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub url: Url,
    pub method: Method,
    pub status: Option<u16>,
    /// Negotiated protocol, e.g. `http/1.1` or `h2`.
    pub protocol: Option<String>,
    pub proxy_connection: bool,
    pub reused_connection: bool,
    pub fetch_type: FetchType,
    pub stages: Vec<Stage>,
}

impl Transaction {
    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }
}

/// Collected metrics for one logical request.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub transactions: Vec<Transaction>,
    pub redirect_count: u32,
}

/// Stamps the phases of a single transaction as the transport progresses.
#[derive(Debug)]
pub struct TransactionTimer {
    url: Url,
    method: Method,
    fetch_type: FetchType,
    request_start: DateTime<Utc>,
    request_end: Option<DateTime<Utc>>,
    response_start: Option<DateTime<Utc>>,
}

impl TransactionTimer {
    /// Start timing; stamps the beginning of the request stage.
    pub fn start(url: Url, method: Method, fetch_type: FetchType) -> Self {
        Self {
            url,
            method,
            fetch_type,
            request_start: Utc::now(),
            request_end: None,
            response_start: None,
        }
    }

    /// The request (headers and body) has been handed to the engine.
    pub fn request_sent(&mut self) {
        self.request_end = Some(Utc::now());
    }

    /// First response byte observed.
    pub fn response_started(&mut self) {
        self.response_start = Some(Utc::now());
    }

    /// Close the transaction; stamps the response end and derives stages.
    pub fn finish(
        self,
        status: Option<u16>,
        protocol: Option<String>,
        reused_connection: bool,
    ) -> Transaction {
        let response_end = Utc::now();
        let request_end = self.request_end.unwrap_or(self.request_start);
        let response_start = self.response_start.unwrap_or(response_end);

        let mut stages = vec![Stage::new(
            StageKind::Request,
            self.request_start,
            request_end,
        )];
        if request_end > self.request_start {
            stages.push(Stage::new(StageKind::Server, request_end, response_start));
        }
        stages.push(Stage::new(StageKind::Response, response_start, response_end));
        stages.push(Stage::new(StageKind::Total, self.request_start, response_end));

        Transaction {
            url: self.url,
            method: self.method,
            status,
            protocol,
            proxy_connection: false,
            reused_connection,
            fetch_type: self.fetch_type,
            stages,
        }
    }
}
