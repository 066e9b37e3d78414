//! Request Model
//!
//! A [`Request`] is the logical description of an HTTP call: method,
//! route, body, parameters, per-request policy overrides, and the observer
//! set. It is built through [`RequestBuilder`] (or the verb shorthands)
//! and stays inert until a client executes it; the pipeline owns all
//! retry state.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::body::{Body, FormParams, FormValue};
use crate::client::CachePolicy;
use crate::error::Error;
use crate::headers::HeaderSet;
use crate::observer::{ObserverSet, ObserverToken, Progress};
use crate::response::Response;
use crate::security::TrustPolicy;
use crate::transport::WireRequest;
use crate::utils::cancel::CancelHandle;
use crate::validator::ResponseValidator;

/// Where request parameters are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamsDestination {
    /// Query string for GET/HEAD/DELETE, body for everything else.
    #[default]
    Auto,
    QueryString,
    HttpBody,
}

impl ParamsDestination {
    /// Resolve `Auto` against a concrete method.
    pub fn resolves_to_query(self, method: &Method) -> bool {
        match self {
            Self::QueryString => true,
            Self::HttpBody => false,
            Self::Auto => {
                *method == Method::GET || *method == Method::HEAD || *method == Method::DELETE
            }
        }
    }
}

/// How the response body is buffered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Accumulate in memory.
    #[default]
    InMemory,
    /// Stream to a spool file; `destination` moves the file on completion.
    Spool { destination: Option<std::path::PathBuf> },
}

/// Opaque transform applied to the materialized wire request.
pub type UrlRequestModifier =
    Arc<dyn Fn(&mut WireRequest) -> Result<(), Error> + Send + Sync>;

/// A logical HTTP request.
#[derive(Clone)]
pub struct Request {
    pub(crate) id: Uuid,
    pub method: Method,
    pub route: String,
    pub body: Body,
    pub params: Option<FormParams>,
    pub params_destination: ParamsDestination,
    pub headers: HeaderSet,
    pub timeout: Option<Duration>,
    pub cache_policy: Option<CachePolicy>,
    pub max_retries: u32,
    pub security: Option<TrustPolicy>,
    /// Overrides the client's validator chain when set.
    pub validators: Option<Vec<Arc<dyn ResponseValidator>>>,
    pub url_modifier: Option<UrlRequestModifier>,
    /// Re-issues the request asking for bytes from this offset.
    pub resume_offset: Option<u64>,
    pub transfer_mode: TransferMode,
    pub allow_empty_response: Option<bool>,
    observers: Arc<ObserverSet>,
    cancel: CancelHandle,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("route", &self.route)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn get(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::GET).route(route)
    }

    pub fn post(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::POST).route(route)
    }

    pub fn put(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::PUT).route(route)
    }

    pub fn delete(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::DELETE).route(route)
    }

    pub fn patch(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::PATCH).route(route)
    }

    pub fn head(route: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(Method::HEAD).route(route)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Handle shared with the pipeline; cancelling it aborts the transport
    /// task and any pending delay.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the request. Idempotent and safe from any thread.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // Observer registration. Clones of a request share the same set.

    pub fn on_progress(
        &self,
        callback: impl Fn(&Progress) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.observers.on_progress(callback)
    }

    pub fn on_response(
        &self,
        callback: impl Fn(&Response) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.observers.on_response(callback)
    }

    pub fn on_decoded<T: DeserializeOwned + 'static>(
        &self,
        callback: impl Fn(Result<T, Error>) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.observers.on_decoded(callback)
    }

    /// Observer that runs ahead of ordinary response observers, used by
    /// alternate-request flows to install state before anything else sees
    /// the response.
    pub fn on_response_priority(
        &self,
        callback: impl Fn(&Response) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.observers.on_response_priority(callback)
    }

    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        self.observers.remove(token)
    }
}

/// Builder facade for [`Request`].
#[derive(Default)]
pub struct RequestBuilder {
    method: Method,
    route: String,
    body: Body,
    params: Option<FormParams>,
    params_destination: ParamsDestination,
    headers: HeaderSet,
    timeout: Option<Duration>,
    cache_policy: Option<CachePolicy>,
    max_retries: u32,
    security: Option<TrustPolicy>,
    validators: Option<Vec<Arc<dyn ResponseValidator>>>,
    url_modifier: Option<UrlRequestModifier>,
    resume_offset: Option<u64>,
    transfer_mode: TransferMode,
    allow_empty_response: Option<bool>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: crate::defaults::MAX_RETRIES,
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// JSON body from any serializable value.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, Error> {
        self.body = Body::json(value)?;
        Ok(self)
    }

    /// Add one form parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.params
            .get_or_insert_with(FormParams::new)
            .set(key, value);
        self
    }

    /// Replace the whole parameter set (including encoding styles).
    pub fn params(mut self, params: FormParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn params_destination(mut self, destination: ParamsDestination) -> Self {
        self.params_destination = destination;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderSet) -> Self {
        self.headers.merge(&headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Maximum number of transport attempts for retryable failures.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn security(mut self, policy: TrustPolicy) -> Self {
        self.security = Some(policy);
        self
    }

    /// Replace the client's validator chain for this request.
    pub fn validators(mut self, validators: Vec<Arc<dyn ResponseValidator>>) -> Self {
        self.validators = Some(validators);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validators.get_or_insert_with(Vec::new).push(validator);
        self
    }

    /// Opaque transform applied to the wire request after materialization.
    pub fn url_modifier(
        mut self,
        modifier: impl Fn(&mut WireRequest) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        self.url_modifier = Some(Arc::new(modifier));
        self
    }

    /// Resume a transfer from a byte offset (adds a `Range` header).
    pub fn resume_from(mut self, offset: u64) -> Self {
        self.resume_offset = Some(offset);
        self
    }

    /// Stream the response body to a spool file instead of memory.
    pub fn spool(mut self) -> Self {
        self.transfer_mode = TransferMode::Spool { destination: None };
        self
    }

    /// Stream to a spool file and move it to `destination` on completion.
    pub fn spool_to(mut self, destination: impl Into<std::path::PathBuf>) -> Self {
        self.transfer_mode = TransferMode::Spool {
            destination: Some(destination.into()),
        };
        self
    }

    pub fn allow_empty_response(mut self, allow: bool) -> Self {
        self.allow_empty_response = Some(allow);
        self
    }

    pub fn build(self) -> Request {
        Request {
            id: Uuid::new_v4(),
            method: self.method,
            route: self.route,
            body: self.body,
            params: self.params,
            params_destination: self.params_destination,
            headers: self.headers,
            timeout: self.timeout,
            cache_policy: self.cache_policy,
            max_retries: self.max_retries,
            security: self.security,
            validators: self.validators,
            url_modifier: self.url_modifier,
            resume_offset: self.resume_offset,
            transfer_mode: self.transfer_mode,
            allow_empty_response: self.allow_empty_response,
            observers: Arc::new(ObserverSet::new()),
            cancel: CancelHandle::new(),
        }
    }
}
