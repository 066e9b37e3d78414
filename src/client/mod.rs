//! Client and execution pipeline
//!
//! A [`Client`] owns the transport configuration, default headers, the
//! validator chain, the cookie store, and (optionally) an injected stub
//! engine. [`Client::execute`] runs the full pipeline for one request:
//! materialize the wire request, dispatch to the stubber or the transport,
//! buffer the body while collecting metrics, follow redirects, run the
//! validator chain, and retry / substitute / deliver accordingly.

mod build;

pub(crate) use build::build_wire_request;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::cookies::CookieStore;
use crate::error::Error;
use crate::headers::HeaderSet;
use crate::metrics::{FetchType, Metrics, TransactionTimer};
use crate::observer::{Progress, ProgressKind};
use crate::request::{Request, TransferMode};
use crate::response::{BodyLocation, Response};
use crate::security::TrustPolicy;
use crate::stub::{StubDecision, StubEngine};
use crate::transport::{Exchange, HttpTransport, TaskContext, Transport, WireRequest};
use crate::validator::{DefaultValidator, ResponseValidator, Validation, run_chain};

/// Cache policy resolved per request (request value wins over client).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Defer to the engine's cache behavior.
    #[default]
    Default,
    NoStore,
    OnlyIfCached,
}

/// Redirect behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FollowMode {
    /// Honor the engine-synthesized request: 301/302/303 re-issue as GET
    /// without a body, 307/308 preserve method and body.
    #[default]
    Follow,
    /// Copy method, headers, and body from the prior request onto the new
    /// URL.
    FollowCopy,
}

/// Verdict of a redirect delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    Follow,
    Refuse,
}

/// Client hook consulted before following a redirect.
pub type RedirectDelegate =
    Arc<dyn Fn(&WireRequest, StatusCode, &Url) -> RedirectAction + Send + Sync>;

pub(crate) struct ClientInner {
    pub base_url: Option<Url>,
    pub default_headers: HeaderSet,
    pub timeout: Duration,
    pub cache_policy: CachePolicy,
    pub follow_mode: FollowMode,
    pub max_redirects: u32,
    pub validators: Vec<Arc<dyn ResponseValidator>>,
    pub redirect_delegate: Option<RedirectDelegate>,
    pub security: Option<TrustPolicy>,
    pub cookies: Arc<CookieStore>,
    pub transport: Arc<dyn Transport>,
    pub stubber: Option<Arc<StubEngine>>,
}

/// Asynchronous HTTP client with validation, stubbing, and metrics.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    /// The cookie store shared by real and stubbed exchanges.
    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.inner.cookies
    }

    /// Execute a request through the full pipeline and always produce a
    /// [`Response`]; failures are carried in `response.error`.
    pub fn execute<'a>(
        &'a self,
        request: &'a Request,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + 'a>> {
        Box::pin(self.execute_inner(request))
    }

    async fn execute_inner(&self, request: &Request) -> Response {
        let cancel = request.cancel_handle();
        let validators = request
            .validators
            .clone()
            .unwrap_or_else(|| self.inner.validators.clone());

        let mut metrics = Metrics::default();
        let mut attempt: u32 = 0;
        debug!(id = %request.id(), method = %request.method, route = %request.route, "executing request");

        loop {
            if cancel.is_cancelled() {
                return self.finish(request, Response::failure(request.id(), Error::Cancelled, metrics));
            }

            // Reset-on-retry: the wire request is rebuilt for every
            // attempt, so stream bodies recreate their source.
            let wire = match build_wire_request(&self.inner, request, &self.inner.cookies) {
                Ok(wire) => wire,
                Err(error) => {
                    warn!(id = %request.id(), %error, "request build failed");
                    return self.finish(request, Response::failure(request.id(), error, metrics));
                }
            };

            let outcome = self.run_once(request, &wire, &mut metrics).await;
            let mut response = Response {
                status: outcome.status,
                headers: outcome.headers,
                body: outcome.body,
                error: outcome.error,
                metrics: std::mem::take(&mut metrics),
                request_id: request.id(),
                original_url: Some(wire.url.clone()),
                final_url: outcome.final_url,
            };

            let verdict = run_chain(&validators, request, &response);
            match verdict {
                Validation::Pass => return self.finish(request, response),
                Validation::Fail(error) => {
                    warn!(id = %request.id(), %error, "validator rejected response");
                    response.error = Some(error);
                    return self.finish(request, response);
                }
                retry_verdict @ (Validation::Retry | Validation::RetryAfter(_)) => {
                    if attempt + 1 >= request.max_retries {
                        warn!(id = %request.id(), attempts = attempt + 1, "retry budget exhausted");
                        response.error = Some(Error::MaxRetryAttemptsReached);
                        return self.finish(request, response);
                    }
                    attempt += 1;
                    metrics = std::mem::take(&mut response.metrics);
                    debug!(id = %request.id(), attempt, "retrying request");
                    if let Validation::RetryAfter(delay) = retry_verdict {
                        let delay = jittered(delay);
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return self.finish(
                                    request,
                                    Response::failure(request.id(), Error::Cancelled, metrics),
                                );
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Validation::RetryWithAlt(alt) => {
                    debug!(id = %request.id(), alt = %alt.id(), "executing alternate request");
                    // Boxed as a trait object: the pipeline recurses into
                    // itself for the alternate request.
                    let alt_response = self.execute(&alt).await;
                    if let Some(alt_error) = alt_response.error {
                        // The original's outcome becomes the alt's error.
                        response.error = Some(alt_error);
                        return self.finish(request, response);
                    }
                    // Replay the original with a fresh retry budget.
                    attempt = 0;
                    metrics = std::mem::take(&mut response.metrics);
                }
            }
        }
    }

    /// Execute and convert a response-carried error into `Err`.
    pub async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let response = self.execute(request).await;
        match &response.error {
            Some(error) => Err(error.clone()),
            None => Ok(response),
        }
    }

    /// Deliver through the observer channels, in order: raw response, then
    /// decoded objects. Progress events were emitted while streaming.
    fn finish(&self, request: &Request, response: Response) -> Response {
        request.observers().notify_response(&response);
        request.observers().notify_decoded(&response);
        response
    }

    /// Route one wire request to the stub engine or the transport.
    async fn dispatch(&self, wire: &WireRequest, cx: &TaskContext) -> Result<Exchange, Error> {
        let engine: &StubEngine = self
            .inner
            .stubber
            .as_deref()
            .unwrap_or_else(|| StubEngine::shared());
        match engine.decide(wire) {
            StubDecision::Reply(stub) => crate::stub::synthesize(stub, wire, cx).await,
            StubDecision::Reject => {
                debug!(url = %wire.url, "no stub matched under opt-out");
                Err(Error::StubNotFound(wire.url.to_string()))
            }
            StubDecision::Bypass => self.inner.transport.send(wire, cx).await,
        }
    }

    /// One physical attempt: dispatch, auth challenge, redirect loop, body
    /// buffering. Appends one transaction per hop to `metrics`.
    async fn run_once(
        &self,
        request: &Request,
        wire: &WireRequest,
        metrics: &mut Metrics,
    ) -> AttemptOutcome {
        let cx = TaskContext {
            request_id: request.id(),
            cancel: request.cancel_handle(),
        };
        let mut current = wire.clone();
        let mut hops: u32 = 0;
        let mut auth_attempted = false;

        loop {
            let fallback = TransactionTimer::start(
                current.url.clone(),
                current.method.clone(),
                FetchType::Unknown,
            );
            let exchange = match self.dispatch(&current, &cx).await {
                Ok(exchange) => exchange,
                Err(error) => {
                    metrics.transactions.push(fallback.finish(None, None, false));
                    return AttemptOutcome::failed(error, current.url);
                }
            };

            if let Some(sent) = current.body_bytes().map(|b| b.len() as u64) {
                if sent > 0 {
                    request.observers().notify_progress(&Progress {
                        kind: ProgressKind::Upload,
                        current: sent,
                        total: Some(sent),
                    });
                }
            }

            let status = exchange.status;

            // Auth challenge: answered once per attempt from the security
            // policy (request-level wins over client-level).
            if status == StatusCode::UNAUTHORIZED && !auth_attempted {
                let policy = request.security.as_ref().or(self.inner.security.as_ref());
                if let Some(provider) = policy.and_then(TrustPolicy::credentials_provider) {
                    auth_attempted = true;
                    let realm = parse_basic_realm(&exchange.headers);
                    let host = current.url.host_str().unwrap_or_default().to_string();
                    if let Some(credentials) = provider(&host, realm.as_deref()) {
                        debug!(url = %current.url, "answering auth challenge");
                        metrics.transactions.push(exchange.timer.finish(
                            Some(status.as_u16()),
                            exchange.protocol.clone(),
                            false,
                        ));
                        let token = base64::engine::general_purpose::STANDARD.encode(format!(
                            "{}:{}",
                            credentials.username, credentials.password
                        ));
                        current.headers.set("Authorization", format!("Basic {token}"));
                        continue;
                    }
                }
            }

            // Redirect handling. 304 and 305 are never redirects.
            if let Some(location) = redirect_target(status, &exchange.headers, &current.url) {
                if hops >= self.inner.max_redirects {
                    metrics.transactions.push(exchange.timer.finish(
                        Some(status.as_u16()),
                        exchange.protocol.clone(),
                        false,
                    ));
                    return AttemptOutcome::failed(Error::TooManyRedirects, current.url);
                }
                let action = match &self.inner.redirect_delegate {
                    Some(delegate) => delegate(&current, status, &location),
                    None => RedirectAction::Follow,
                };
                if action == RedirectAction::Follow {
                    debug!(from = %current.url, to = %location, status = status.as_u16(), "following redirect");
                    self.inner
                        .cookies
                        .store_response_cookies(&current.url, &exchange.set_cookies);
                    metrics.transactions.push(exchange.timer.finish(
                        Some(status.as_u16()),
                        exchange.protocol.clone(),
                        false,
                    ));
                    metrics.redirect_count += 1;
                    current = next_hop(current, status, location, self.inner.follow_mode, &self.inner.cookies);
                    hops += 1;
                    continue;
                }
            }

            // Final hop: install cookies, then drain the body.
            self.inner
                .cookies
                .store_response_cookies(&current.url, &exchange.set_cookies);
            return self
                .drain_exchange(request, exchange, current.url, metrics, &cx)
                .await;
        }
    }

    /// Stream the exchange body into memory or a spool file, emitting
    /// download progress along the way.
    async fn drain_exchange(
        &self,
        request: &Request,
        exchange: Exchange,
        final_url: Url,
        metrics: &mut Metrics,
        cx: &TaskContext,
    ) -> AttemptOutcome {
        let Exchange {
            status,
            headers,
            set_cookies: _,
            mut body,
            timer,
            protocol,
        } = exchange;
        let total = headers.content_length();
        let mut downloaded: u64 = 0;

        let spool_path = match &request.transfer_mode {
            TransferMode::InMemory => None,
            TransferMode::Spool { .. } => {
                Some(std::env::temp_dir().join(format!("wiretap-{}.spool", request.id())))
            }
        };
        let mut spool_file = match &spool_path {
            None => None,
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(file) => Some(file),
                Err(error) => {
                    metrics.transactions.push(timer.finish(
                        Some(status.as_u16()),
                        protocol,
                        false,
                    ));
                    return AttemptOutcome::failed(error.into(), final_url);
                }
            },
        };
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = cx.cancel.cancelled() => {
                    metrics.transactions.push(timer.finish(Some(status.as_u16()), protocol, false));
                    return AttemptOutcome::failed(Error::Cancelled, final_url);
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                None => break,
                Some(Err(error)) => {
                    metrics.transactions.push(timer.finish(Some(status.as_u16()), protocol, false));
                    return AttemptOutcome {
                        status: Some(status),
                        headers,
                        body: BodyLocation::default(),
                        error: Some(error),
                        final_url: Some(final_url),
                    };
                }
                Some(Ok(chunk)) => {
                    downloaded += chunk.len() as u64;
                    match &mut spool_file {
                        None => buffer.extend_from_slice(&chunk),
                        Some(file) => {
                            use tokio::io::AsyncWriteExt;
                            if let Err(error) = file.write_all(&chunk).await {
                                metrics.transactions.push(timer.finish(
                                    Some(status.as_u16()),
                                    protocol,
                                    false,
                                ));
                                return AttemptOutcome::failed(error.into(), final_url);
                            }
                        }
                    }
                    request.observers().notify_progress(&Progress {
                        kind: ProgressKind::Download,
                        current: downloaded,
                        total,
                    });
                }
            }
        }

        metrics
            .transactions
            .push(timer.finish(Some(status.as_u16()), protocol, false));

        let body = match (spool_path, &request.transfer_mode) {
            (Some(path), TransferMode::Spool { destination }) => {
                if let Some(file) = &mut spool_file {
                    use tokio::io::AsyncWriteExt;
                    let _ = file.flush().await;
                }
                drop(spool_file);
                match destination {
                    // The spool file is moved to its final location on
                    // completion.
                    Some(destination) => match move_file(&path, destination).await {
                        Ok(()) => BodyLocation::Spool(destination.clone()),
                        Err(error) => return AttemptOutcome::failed(error, final_url),
                    },
                    None => BodyLocation::Spool(path),
                }
            }
            _ => BodyLocation::InMemory(buffer.into()),
        };

        AttemptOutcome {
            status: Some(status),
            headers,
            body,
            error: None,
            final_url: Some(final_url),
        }
    }
}

struct AttemptOutcome {
    status: Option<StatusCode>,
    headers: HeaderSet,
    body: BodyLocation,
    error: Option<Error>,
    final_url: Option<Url>,
}

impl AttemptOutcome {
    fn failed(error: Error, final_url: Url) -> Self {
        Self {
            status: None,
            headers: HeaderSet::new(),
            body: BodyLocation::default(),
            error: Some(error),
            final_url: Some(final_url),
        }
    }
}

/// The redirect target, when the status and headers describe one.
fn redirect_target(status: StatusCode, headers: &HeaderSet, base: &Url) -> Option<Url> {
    let is_redirect = matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308);
    if !is_redirect {
        return None;
    }
    let location = headers.location()?;
    base.join(location).ok()
}

/// Build the wire request for the next redirect hop.
fn next_hop(
    previous: WireRequest,
    status: StatusCode,
    location: Url,
    mode: FollowMode,
    cookies: &CookieStore,
) -> WireRequest {
    let mut next = previous;
    next.url = location;

    if mode == FollowMode::Follow {
        // Engine-synthesized request: 303 always becomes GET; 301/302
        // rewrite non-GET/HEAD methods to GET. The body drops with the
        // method.
        let code = status.as_u16();
        let rewrite = code == 303
            || (matches!(code, 301 | 302)
                && next.method != Method::GET
                && next.method != Method::HEAD);
        if rewrite {
            next.method = Method::GET;
            next.payload = crate::body::EncodedPayload::Empty;
            for name in ["Content-Length", "Content-Type", "Content-Encoding", "Transfer-Encoding"] {
                next.headers.remove(name);
            }
        }
    }

    // Cookies are re-evaluated for the new URL.
    next.headers.remove("Cookie");
    if let Some(cookie) = cookies.cookie_header(&next.url) {
        next.headers.set("Cookie", cookie);
    }
    next
}

fn parse_basic_realm(headers: &HeaderSet) -> Option<String> {
    let challenge = headers.get("www-authenticate")?;
    let lower = challenge.to_ascii_lowercase();
    let idx = lower.find("realm=\"")?;
    let rest = &challenge[idx + 7..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Scheduled retry delays carry a little jitter to avoid thundering herds.
fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-0.1..=0.1);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderSet,
    timeout: Duration,
    cache_policy: CachePolicy,
    follow_mode: FollowMode,
    max_redirects: u32,
    validators: Vec<Arc<dyn ResponseValidator>>,
    use_default_validator: bool,
    redirect_delegate: Option<RedirectDelegate>,
    security: Option<TrustPolicy>,
    transport: Option<Arc<dyn Transport>>,
    stubber: Option<Arc<StubEngine>>,
    allow_empty_responses: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderSet::new(),
            timeout: crate::defaults::REQUEST_TIMEOUT,
            cache_policy: CachePolicy::Default,
            follow_mode: FollowMode::Follow,
            max_redirects: crate::defaults::MAX_REDIRECTS,
            validators: Vec::new(),
            use_default_validator: true,
            redirect_delegate: None,
            security: None,
            transport: None,
            stubber: None,
            allow_empty_responses: true,
        }
    }

    /// URL prefix for every route.
    pub fn base_url(mut self, base: &str) -> Result<Self, Error> {
        self.base_url = Some(Url::parse(base)?);
        Ok(self)
    }

    /// Merged as the lowest-priority header layer above library defaults.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.set(name, value);
        self
    }

    pub fn default_headers(mut self, headers: HeaderSet) -> Self {
        self.default_headers.merge(&headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn follow_mode(mut self, mode: FollowMode) -> Self {
        self.follow_mode = mode;
        self
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Append a validator after the default chain.
    pub fn validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Replace the whole chain, including the default validator.
    pub fn validators(mut self, validators: Vec<Arc<dyn ResponseValidator>>) -> Self {
        self.validators = validators;
        self.use_default_validator = false;
        self
    }

    pub fn redirect_delegate(
        mut self,
        delegate: impl Fn(&WireRequest, StatusCode, &Url) -> RedirectAction + Send + Sync + 'static,
    ) -> Self {
        self.redirect_delegate = Some(Arc::new(delegate));
        self
    }

    pub fn security(mut self, policy: TrustPolicy) -> Self {
        self.security = Some(policy);
        self
    }

    /// Replace the engine-backed transport (testing seam).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Inject a stub engine for this client. Without one, the process-wide
    /// shared engine applies when enabled.
    pub fn stubber(mut self, engine: Arc<StubEngine>) -> Self {
        self.stubber = Some(engine);
        self
    }

    pub fn allow_empty_responses(mut self, allow: bool) -> Self {
        self.allow_empty_responses = allow;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_security(self.security.as_ref())?),
        };
        let mut validators = Vec::new();
        if self.use_default_validator {
            validators.push(
                Arc::new(DefaultValidator::new(self.allow_empty_responses))
                    as Arc<dyn ResponseValidator>,
            );
        }
        validators.extend(self.validators);

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                default_headers: self.default_headers,
                timeout: self.timeout,
                cache_policy: self.cache_policy,
                follow_mode: self.follow_mode,
                max_redirects: self.max_redirects,
                validators,
                redirect_delegate: self.redirect_delegate,
                security: self.security,
                cookies: Arc::new(CookieStore::new()),
                transport,
                stubber: self.stubber,
            }),
        })
    }
}

/// Rename, falling back to copy-and-remove across filesystems.
async fn move_file(from: &std::path::Path, to: &std::path::Path) -> Result<(), Error> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}
