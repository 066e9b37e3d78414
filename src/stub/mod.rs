//! Stub Interception Engine
//!
//! The engine sits ahead of the transport. Enabled, it matches outgoing
//! requests against registered rules and synthesizes responses without
//! touching the network; unmatched requests either pass through to the
//! real transport (opt-in) or fail with a stub-not-found error (opt-out).
//! A process-wide shared engine exists for convenience, and clients accept
//! an explicitly injected engine so tests never share state.

pub mod matchers;
mod response;

pub use matchers::{
    BodyMatcher, CustomMatcher, JsonBodyMatcher, RegexMatcher, RegexTarget, StubMatcher,
    UriTemplateMatcher, UrlMatcher,
};
pub use response::{EchoResponder, StubBody, StubResponder, StubResponse};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::stream;
use once_cell::sync::Lazy;
use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::metrics::{FetchType, TransactionTimer};
use crate::transport::{Exchange, TaskContext, WireRequest};

/// What happens to requests no stub rule handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnhandledMode {
    /// Pass through to the real transport.
    #[default]
    OptIn,
    /// Fail with [`Error::StubNotFound`].
    OptOut,
}

/// A stub rule: matchers (AND) plus one responder per method.
pub struct StubRule {
    id: Uuid,
    matchers: Vec<Arc<dyn StubMatcher>>,
    responses: HashMap<Method, Arc<dyn StubResponder>>,
}

impl StubRule {
    /// Start a rule from its first matcher.
    pub fn when(matcher: impl StubMatcher + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            matchers: vec![Arc::new(matcher)],
            responses: HashMap::new(),
        }
    }

    /// A rule with no matchers; it applies to every request.
    pub fn any() -> Self {
        Self {
            id: Uuid::new_v4(),
            matchers: Vec::new(),
            responses: HashMap::new(),
        }
    }

    /// Add a further matcher; all matchers must agree.
    pub fn and(mut self, matcher: impl StubMatcher + 'static) -> Self {
        self.matchers.push(Arc::new(matcher));
        self
    }

    /// Register the responder for one method.
    pub fn reply(mut self, method: Method, responder: impl StubResponder + 'static) -> Self {
        self.responses.insert(method, Arc::new(responder));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, request: &WireRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }

    fn responder_for(&self, method: &Method) -> Option<&Arc<dyn StubResponder>> {
        self.responses.get(method)
    }
}

/// Stable identity of an ignore rule, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreToken(Uuid);

struct IgnoreRule {
    token: IgnoreToken,
    matchers: Vec<Arc<dyn StubMatcher>>,
}

/// Outcome of consulting the engine for one request.
pub(crate) enum StubDecision {
    /// Not handled here; use the real transport.
    Bypass,
    /// Opt-out mode and nothing matched.
    Reject,
    /// Deliver this synthesized response.
    Reply(StubResponse),
}

/// Registry of stub rules and ignore rules.
#[derive(Default)]
pub struct StubEngine {
    enabled: AtomicBool,
    unhandled_mode: RwLock<UnhandledMode>,
    rules: RwLock<Vec<StubRule>>,
    ignores: RwLock<Vec<IgnoreRule>>,
}

static SHARED: Lazy<StubEngine> = Lazy::new(StubEngine::new);

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide shared engine. Disabled until enabled; prefer an
    /// injected engine in tests.
    pub fn shared() -> &'static StubEngine {
        &SHARED
    }

    /// Install the engine ahead of the transport. Idempotent.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Uninstall the engine. Idempotent; registered rules are kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_unhandled_mode(&self, mode: UnhandledMode) {
        *self.unhandled_mode.write().expect("stub lock poisoned") = mode;
    }

    pub fn unhandled_mode(&self) -> UnhandledMode {
        *self.unhandled_mode.read().expect("stub lock poisoned")
    }

    /// Register a rule; later rules are consulted after earlier ones.
    pub fn add_rule(&self, rule: StubRule) -> Uuid {
        let id = rule.id;
        self.rules.write().expect("stub lock poisoned").push(rule);
        id
    }

    pub fn remove_rule(&self, id: Uuid) -> bool {
        let mut rules = self.rules.write().expect("stub lock poisoned");
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    pub fn clear_rules(&self) {
        self.rules.write().expect("stub lock poisoned").clear();
    }

    /// Requests matching all of `matchers` bypass the stubber entirely.
    pub fn add_ignore_rule(&self, matchers: Vec<Arc<dyn StubMatcher>>) -> IgnoreToken {
        let token = IgnoreToken(Uuid::new_v4());
        self.ignores
            .write()
            .expect("stub lock poisoned")
            .push(IgnoreRule { token, matchers });
        token
    }

    pub fn remove_ignore_rule(&self, token: IgnoreToken) -> bool {
        let mut ignores = self.ignores.write().expect("stub lock poisoned");
        let before = ignores.len();
        ignores.retain(|r| r.token != token);
        ignores.len() != before
    }

    /// Full teardown: disable and drop every rule and ignore rule.
    pub fn reset(&self) {
        self.disable();
        self.clear_rules();
        self.ignores.write().expect("stub lock poisoned").clear();
        self.set_unhandled_mode(UnhandledMode::default());
    }

    /// Decide how one outgoing request is handled.
    pub(crate) fn decide(&self, request: &WireRequest) -> StubDecision {
        if !self.is_enabled() {
            return StubDecision::Bypass;
        }
        // Only web schemes are interceptable.
        if !matches!(request.scheme(), "http" | "https") {
            return StubDecision::Bypass;
        }
        {
            let ignores = self.ignores.read().expect("stub lock poisoned");
            if ignores
                .iter()
                .any(|rule| rule.matchers.iter().all(|m| m.matches(request)))
            {
                debug!(url = %request.url, "request ignored by stubber");
                return StubDecision::Bypass;
            }
        }
        {
            let rules = self.rules.read().expect("stub lock poisoned");
            for rule in rules.iter() {
                // A rule without a responder for this method is a non-match.
                if rule.matches(request) {
                    if let Some(responder) = rule.responder_for(&request.method) {
                        debug!(url = %request.url, rule = %rule.id, "stub rule matched");
                        return StubDecision::Reply(responder.adapt(request));
                    }
                }
            }
        }
        match self.unhandled_mode() {
            UnhandledMode::OptIn => StubDecision::Bypass,
            UnhandledMode::OptOut => StubDecision::Reject,
        }
    }
}

/// Turn a stub response into a transport exchange, byte-equivalent to a
/// real response: status, headers in insertion order, then body bytes.
pub(crate) async fn synthesize(
    stub: StubResponse,
    request: &WireRequest,
    cx: &TaskContext,
) -> Result<Exchange, Error> {
    if let Some(delay) = stub.delay {
        // Cancellation during the wait never delivers the stubbed body.
        tokio::select! {
            _ = cx.cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    if let Some(error) = stub.error {
        return Err(error);
    }

    let mut timer = TransactionTimer::start(
        request.url.clone(),
        request.method.clone(),
        FetchType::LocalCache,
    );
    timer.request_sent();

    let body = stub.resolve_body()?;
    let mut headers = stub.headers.clone();
    headers.set_if_absent("Content-Length", body.len().to_string());
    let set_cookies = headers
        .iter()
        .filter(|h| h.name().eq_ignore_ascii_case("set-cookie"))
        .map(|h| h.value().to_string())
        .collect();

    timer.response_started();
    let chunks: Vec<Result<bytes::Bytes, Error>> = if body.is_empty() {
        Vec::new()
    } else {
        vec![Ok(body)]
    };
    Ok(Exchange {
        status: stub.status,
        headers,
        set_cookies,
        body: Box::pin(stream::iter(chunks)),
        timer,
        protocol: None,
    })
}
