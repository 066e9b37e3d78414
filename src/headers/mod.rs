//! Header Store
//!
//! [`HeaderSet`] is an ordered, case-insensitive name→value map. Lookups
//! ignore case, writes replace in place (keeping the position of the first
//! insertion), and iteration yields entries in first-insertion order with
//! the casing of the latest write preserved for emission.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::Error;

/// A single header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Header name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered sequence of headers with unique case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<Header>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Insert or replace a header. Replacement keeps the position of the
    /// first insertion; the stored casing follows the latest write.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let header = Header::new(name, value);
        match self.position(&header.name) {
            Some(idx) => self.entries[idx] = header,
            None => self.entries.push(header),
        }
    }

    /// Insert only when the name is not present yet.
    pub fn set_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let header = Header::new(name, value);
        if self.position(&header.name).is_none() {
            self.entries.push(header);
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Header> {
        self.position(name).map(|idx| self.entries.remove(idx))
    }

    /// Merge `other` into `self`; entries from `other` override.
    pub fn merge(&mut self, other: &HeaderSet) {
        for header in &other.entries {
            self.set(header.name.clone(), header.value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into a dictionary with lower-cased keys.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
            .collect()
    }

    /// Convert into a `reqwest` header map for dispatch.
    pub fn to_header_map(&self) -> Result<HeaderMap, Error> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for header in &self.entries {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
                Error::InvalidParameter(format!("invalid header name '{}': {e}", header.name))
            })?;
            let value = HeaderValue::from_str(&header.value).map_err(|e| {
                Error::InvalidParameter(format!("invalid header value '{}': {e}", header.value))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Build from a `reqwest` header map. Duplicate names collapse to the
    /// last value, per the replacement rule.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut set = Self::new();
        for (name, value) in map.iter() {
            if let Ok(value) = value.to_str() {
                set.set(name.as_str(), value);
            }
        }
        set
    }

    // Typed accessors for the handful of headers the pipeline inspects.

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.parse().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderSet {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.set(name, value);
        }
        set
    }
}
