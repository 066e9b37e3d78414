//! Stub Matchers
//!
//! Predicates over the outgoing wire request. Matchers inside one rule
//! combine with AND; rules combine with OR in insertion order.

use std::sync::Arc;

use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::error::Error;
use crate::transport::WireRequest;

/// A predicate over an outgoing request.
pub trait StubMatcher: Send + Sync {
    fn matches(&self, request: &WireRequest) -> bool;
}

/// Matches against the request URL.
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    url: Url,
    ignore_query: bool,
    ignore_path: bool,
}

impl UrlMatcher {
    /// Exact URL equality.
    pub fn exact(url: &str) -> Result<Self, Error> {
        Ok(Self {
            url: Url::parse(url)?,
            ignore_query: false,
            ignore_path: false,
        })
    }

    /// Equate scheme, host, and path; the query string is ignored.
    pub fn ignoring_query(mut self) -> Self {
        self.ignore_query = true;
        self
    }

    /// Equate scheme and host only.
    pub fn ignoring_path(mut self) -> Self {
        self.ignore_path = true;
        self
    }
}

impl StubMatcher for UrlMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        let lhs = &self.url;
        let rhs = &request.url;
        if self.ignore_path {
            return lhs.scheme() == rhs.scheme()
                && lhs.host_str() == rhs.host_str()
                && lhs.port_or_known_default() == rhs.port_or_known_default();
        }
        if self.ignore_query {
            return lhs.scheme() == rhs.scheme()
                && lhs.host_str() == rhs.host_str()
                && lhs.port_or_known_default() == rhs.port_or_known_default()
                && lhs.path() == rhs.path();
        }
        lhs == rhs
    }
}

/// What part of the request a [`RegexMatcher`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexTarget {
    Url,
    /// Body decoded as UTF-8 text.
    Body,
    /// Header names. Only the first header field is inspected.
    HeaderKey,
    /// Header values. Only the first header field is inspected.
    HeaderValue,
}

/// Regular-expression matcher over URL, body, or headers.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    target: RegexTarget,
}

impl RegexMatcher {
    pub fn new(pattern: &str, target: RegexTarget) -> Result<Self, Error> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidParameter(format!("invalid regex: {e}")))?;
        Ok(Self { regex, target })
    }
}

impl StubMatcher for RegexMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        match self.target {
            RegexTarget::Url => self.regex.is_match(request.url.as_str()),
            RegexTarget::Body => request
                .body_bytes()
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .map(|text| self.regex.is_match(text))
                .unwrap_or(false),
            // The first-encountered field decides; remaining headers are
            // not consulted.
            RegexTarget::HeaderKey => request
                .headers
                .iter()
                .next()
                .map(|h| self.regex.is_match(h.name()))
                .unwrap_or(false),
            RegexTarget::HeaderValue => request
                .headers
                .iter()
                .next()
                .map(|h| self.regex.is_match(h.value()))
                .unwrap_or(false),
        }
    }
}

/// RFC 6570 level-1 URI template matcher: `{name}` expressions match one
/// path or query segment. A request matches when the template extracts
/// from the absolute URL or from the path alone.
#[derive(Debug, Clone)]
pub struct UriTemplateMatcher {
    regex: Regex,
}

impl UriTemplateMatcher {
    pub fn new(template: &str) -> Result<Self, Error> {
        let regex = Regex::new(&compile_template(template)?)
            .map_err(|e| Error::InvalidParameter(format!("invalid URI template: {e}")))?;
        Ok(Self { regex })
    }
}

impl StubMatcher for UriTemplateMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        self.regex.is_match(request.url.as_str()) || self.regex.is_match(request.url.path())
    }
}

/// Translate a URI template into an anchored regular expression.
fn compile_template(template: &str) -> Result<String, Error> {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        let Some(close) = rest[open..].find('}') else {
            return Err(Error::InvalidParameter(format!(
                "unterminated expression in URI template '{template}'"
            )));
        };
        let name = &rest[open + 1..open + close];
        if name.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "empty expression in URI template '{template}'"
            )));
        }
        pattern.push_str("[^/?#]+");
        rest = &rest[open + close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Ok(pattern)
}

/// Structural equality against a JSON-decoded request body.
#[derive(Debug, Clone)]
pub struct JsonBodyMatcher {
    expected: serde_json::Value,
}

impl JsonBodyMatcher {
    pub fn new(expected: serde_json::Value) -> Self {
        Self { expected }
    }

    pub fn of<T: Serialize>(expected: &T) -> Result<Self, Error> {
        Ok(Self {
            expected: serde_json::to_value(expected)?,
        })
    }
}

impl StubMatcher for JsonBodyMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        request
            .body_bytes()
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(bytes).ok())
            .map(|decoded| decoded == self.expected)
            .unwrap_or(false)
    }
}

/// Byte-exact body equality.
#[derive(Debug, Clone)]
pub struct BodyMatcher {
    expected: Bytes,
}

impl BodyMatcher {
    pub fn new(expected: impl Into<Bytes>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl StubMatcher for BodyMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        request
            .body_bytes()
            .map(|bytes| *bytes == self.expected)
            .unwrap_or_else(|| self.expected.is_empty())
    }
}

/// User-supplied predicate.
#[derive(Clone)]
pub struct CustomMatcher {
    predicate: Arc<dyn Fn(&WireRequest) -> bool + Send + Sync>,
}

impl CustomMatcher {
    pub fn new(predicate: impl Fn(&WireRequest) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl StubMatcher for CustomMatcher {
    fn matches(&self, request: &WireRequest) -> bool {
        (self.predicate)(request)
    }
}
