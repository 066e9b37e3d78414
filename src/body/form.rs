//! Form-urlencoded parameters
//!
//! Parameters are dynamically typed values ([`FormValue`]) so the encoder
//! can keep booleans and numbers distinguishable. Encoding follows
//! RFC 3986 section 3.4 with `?` and `/` retained, keys sorted
//! lexicographically, `key[inner]` for nested objects, and configurable
//! array/bool styles.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left literal in query components: unreserved plus `?` and `/`.
const QUERY_ALLOWED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'?')
    .remove(b'/');

/// A dynamically typed form parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<FormValue>),
    Object(BTreeMap<String, FormValue>),
}

impl From<bool> for FormValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FormValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FormValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for FormValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for FormValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FormValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FormValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<V: Into<FormValue>> From<Vec<V>> for FormValue {
    fn from(items: Vec<V>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// How array values render their key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayEncoding {
    /// `key[]=a&key[]=b`
    #[default]
    Brackets,
    /// `key=a&key=b`
    NoBrackets,
}

/// How booleans render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoolEncoding {
    /// `0` / `1`
    #[default]
    Numeric,
    /// `true` / `false`
    Literal,
}

/// An ordered-by-key set of form parameters plus encoding policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormParams {
    values: BTreeMap<String, FormValue>,
    pub array_encoding: ArrayEncoding,
    pub bool_encoding: BoolEncoding,
}

impl FormParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FormValue>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn array_encoding(mut self, encoding: ArrayEncoding) -> Self {
        self.array_encoding = encoding;
        self
    }

    pub fn bool_encoding(mut self, encoding: BoolEncoding) -> Self {
        self.bool_encoding = encoding;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flatten into `(key, value)` pairs, unencoded, keys sorted.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (key, value) in &self.values {
            flatten(key, value, self.array_encoding, self.bool_encoding, &mut out);
        }
        out
    }

    /// Percent-encoded query string.
    pub fn encode(&self) -> String {
        self.pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn flatten(
    key: &str,
    value: &FormValue,
    arrays: ArrayEncoding,
    bools: BoolEncoding,
    out: &mut Vec<(String, String)>,
) {
    match value {
        FormValue::Object(map) => {
            for (inner, nested) in map {
                flatten(&format!("{key}[{inner}]"), nested, arrays, bools, out);
            }
        }
        FormValue::Array(items) => {
            let item_key = match arrays {
                ArrayEncoding::Brackets => format!("{key}[]"),
                ArrayEncoding::NoBrackets => key.to_string(),
            };
            for item in items {
                flatten(&item_key, item, arrays, bools, out);
            }
        }
        FormValue::Bool(b) => {
            let rendered = match (bools, b) {
                (BoolEncoding::Numeric, true) => "1",
                (BoolEncoding::Numeric, false) => "0",
                (BoolEncoding::Literal, true) => "true",
                (BoolEncoding::Literal, false) => "false",
            };
            out.push((key.to_string(), rendered.to_string()));
        }
        FormValue::Int(i) => out.push((key.to_string(), i.to_string())),
        FormValue::Float(f) => out.push((key.to_string(), f.to_string())),
        FormValue::String(s) => out.push((key.to_string(), s.clone())),
        FormValue::Null => out.push((key.to_string(), String::new())),
    }
}

/// Percent-encode one query component.
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, QUERY_ALLOWED).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_and_arrays_bracketed() {
        let params = FormParams::new()
            .with("q", "red shoes")
            .with("page", 2)
            .with("flags", vec![1, 2]);
        assert_eq!(
            params.encode(),
            "flags%5B%5D=1&flags%5B%5D=2&page=2&q=red%20shoes"
        );
    }

    #[test]
    fn array_style_without_brackets() {
        let params = FormParams::new()
            .with("flags", vec![1, 2])
            .array_encoding(ArrayEncoding::NoBrackets);
        assert_eq!(params.encode(), "flags=1&flags=2");
    }

    #[test]
    fn bools_numeric_by_default_literal_on_demand() {
        let numeric = FormParams::new().with("on", true).with("off", false);
        assert_eq!(numeric.encode(), "off=0&on=1");

        let literal = FormParams::new()
            .with("on", true)
            .bool_encoding(BoolEncoding::Literal);
        assert_eq!(literal.encode(), "on=true");
    }

    #[test]
    fn bool_and_number_stay_distinguishable() {
        let params = FormParams::new().with("flag", true).with("count", 1);
        // Numeric bool and the integer render identically on the wire but
        // the typed values do not collapse before encoding.
        assert_eq!(params.pairs(), vec![
            ("count".to_string(), "1".to_string()),
            ("flag".to_string(), "1".to_string()),
        ]);
    }

    #[test]
    fn nested_objects_use_bracket_paths() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), FormValue::from("Oslo"));
        address.insert("zip".to_string(), FormValue::from("0150"));
        let params = FormParams::new().with("addr", FormValue::Object(address));
        assert_eq!(params.encode(), "addr%5Bcity%5D=Oslo&addr%5Bzip%5D=0150");
    }

    #[test]
    fn floats_render_canonical_decimal() {
        let params = FormParams::new().with("ratio", 2.5).with("whole", 2.0);
        assert_eq!(params.encode(), "ratio=2.5&whole=2");
    }

    #[test]
    fn question_mark_and_slash_are_retained() {
        let params = FormParams::new().with("path", "a/b?c");
        assert_eq!(params.encode(), "path=a/b?c");
    }

    #[test]
    fn decoding_round_trips_the_mapping() {
        let params = FormParams::new()
            .with("q", "red shoes")
            .with("lang", "no/nb");
        let encoded = params.encode();
        let decoded: Vec<(String, String)> = encoded
            .split('&')
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap();
                (
                    urlencoding::decode(k).unwrap().into_owned(),
                    urlencoding::decode(v).unwrap().into_owned(),
                )
            })
            .collect();
        assert_eq!(decoded, params.pairs());
    }
}
