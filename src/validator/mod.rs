//! Validator Chain
//!
//! Validators inspect a finished (request, response) pair and produce one
//! terminal verdict: accept, fail, retry, retry after a delay, or retry
//! after executing an alternate request. They run in registration order;
//! the first non-pass verdict wins, so composition is total.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::request::Request;
use crate::response::{BodyLocation, Response};

/// Verdict of a single validator.
#[derive(Debug)]
pub enum Validation {
    Pass,
    Fail(Error),
    /// Retry if the retry budget allows.
    Retry,
    /// Retry after a scheduled delay.
    RetryAfter(Duration),
    /// Execute the alternate request, then replay the original.
    RetryWithAlt(Box<Request>),
}

/// A response validator.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, request: &Request, response: &Response) -> Validation;
}

/// Run a chain in order and return the first non-pass verdict.
pub fn run_chain(
    validators: &[Arc<dyn ResponseValidator>],
    request: &Request,
    response: &Response,
) -> Validation {
    for validator in validators {
        match validator.validate(request, response) {
            Validation::Pass => continue,
            verdict => return verdict,
        }
    }
    Validation::Pass
}

/// The default validator:
/// - transient transport failures (timeout, unreachable host, lost
///   connection, DNS) ask for a retry;
/// - an empty body is a failure when empty bodies are disallowed;
/// - everything else passes.
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    pub allow_empty_responses: bool,
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self {
            allow_empty_responses: true,
        }
    }
}

impl DefaultValidator {
    pub fn new(allow_empty_responses: bool) -> Self {
        Self {
            allow_empty_responses,
        }
    }
}

impl ResponseValidator for DefaultValidator {
    fn validate(&self, request: &Request, response: &Response) -> Validation {
        if let Some(error) = &response.error {
            if error.is_retryable() {
                return Validation::Retry;
            }
            // Hard errors surface as-is.
            return Validation::Pass;
        }
        let allow_empty = request
            .allow_empty_response
            .unwrap_or(self.allow_empty_responses);
        if !allow_empty && body_is_empty(response) {
            return Validation::Fail(Error::EmptyResponse);
        }
        Validation::Pass
    }
}

fn body_is_empty(response: &Response) -> bool {
    match &response.body {
        BodyLocation::InMemory(data) => data.is_empty(),
        BodyLocation::Spool(path) => std::fs::metadata(path)
            .map(|m| m.len() == 0)
            .unwrap_or(false),
    }
}

/// Provider asked for an alternate request when a trigger status fires.
pub type AltRequestProvider =
    Arc<dyn Fn(&Request, &Response) -> Option<Request> + Send + Sync>;

/// Fires an alternate request (e.g. a silent re-authentication) on
/// configured trigger statuses, then replays the original. The number of
/// alternate executions per session is capped; exceeding the cap fails
/// with [`Error::MaxRetryAttemptsReached`].
pub struct AltRequestValidator {
    trigger_codes: HashSet<u16>,
    provider: AltRequestProvider,
    max_executions: u32,
    executed: AtomicU32,
}

impl AltRequestValidator {
    pub fn new(
        provider: impl Fn(&Request, &Response) -> Option<Request> + Send + Sync + 'static,
    ) -> Self {
        Self {
            trigger_codes: [401, 403].into_iter().collect(),
            provider: Arc::new(provider),
            max_executions: 1,
            executed: AtomicU32::new(0),
        }
    }

    pub fn with_trigger_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.trigger_codes = codes.into_iter().collect();
        self
    }

    pub fn with_max_executions(mut self, cap: u32) -> Self {
        self.max_executions = cap;
        self
    }

    /// Alternate executions performed so far.
    pub fn executions(&self) -> u32 {
        self.executed.load(Ordering::SeqCst)
    }
}

impl ResponseValidator for AltRequestValidator {
    fn validate(&self, request: &Request, response: &Response) -> Validation {
        let Some(status) = response.status_code() else {
            return Validation::Pass;
        };
        if !self.trigger_codes.contains(&status) {
            return Validation::Pass;
        }
        if self.executed.load(Ordering::SeqCst) >= self.max_executions {
            return Validation::Fail(Error::MaxRetryAttemptsReached);
        }
        match (self.provider)(request, response) {
            Some(alt) => {
                self.executed.fetch_add(1, Ordering::SeqCst);
                Validation::RetryWithAlt(Box::new(alt))
            }
            None => Validation::Pass,
        }
    }
}
