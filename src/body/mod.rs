//! Body Serializers
//!
//! [`Body`] describes what a request carries; [`Body::encode`] turns it
//! into wire bytes (or a replayable stream source) plus the headers the
//! chosen representation demands. Serialization is lazy: JSON and forms
//! are held structured until the wire request is materialized.

mod form;
mod multipart;
mod stream;

pub use form::{ArrayEncoding, BoolEncoding, FormParams, FormValue, encode_component};
pub use multipart::{MultipartForm, Part};
pub use stream::StreamSource;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Error;
use crate::headers::HeaderSet;

/// Request body representation.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Text {
        content: String,
        content_type: Option<String>,
    },
    /// Serialized lazily at encode time.
    Json(serde_json::Value),
    FormUrlEncoded(FormParams),
    Multipart(MultipartForm),
    Stream(StreamSource),
}

impl Body {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn bytes(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            content_type: None,
        }
    }

    pub fn text_with(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// JSON body from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn json_value(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    pub fn form(params: FormParams) -> Self {
        Self::FormUrlEncoded(params)
    }

    pub fn multipart(form: MultipartForm) -> Self {
        Self::Multipart(form)
    }

    pub fn stream_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        Ok(Self::Stream(StreamSource::file(path)?))
    }

    pub fn stream_bytes(data: impl Into<Bytes>) -> Self {
        Self::Stream(StreamSource::bytes(data))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Serialize into a wire payload plus the representation's headers.
    ///
    /// Non-empty variants always emit `Content-Length`; content-shape
    /// headers are variant-specific. Streams additionally ask the engine
    /// to keep the connection alive.
    pub fn encode(&self) -> Result<EncodedBody, Error> {
        match self {
            Self::Empty => Ok(EncodedBody {
                payload: EncodedPayload::Empty,
                headers: HeaderSet::new(),
            }),
            Self::Bytes { data, content_type } => {
                let mut headers = HeaderSet::new();
                headers.set(
                    "Content-Type",
                    content_type.as_deref().unwrap_or("application/octet-stream"),
                );
                headers.set("Content-Length", data.len().to_string());
                Ok(EncodedBody {
                    payload: EncodedPayload::Bytes(data.clone()),
                    headers,
                })
            }
            Self::Text { content, content_type } => {
                let data = Bytes::from(content.clone().into_bytes());
                let mut headers = HeaderSet::new();
                headers.set(
                    "Content-Type",
                    content_type
                        .as_deref()
                        .unwrap_or("text/plain; charset=utf-8"),
                );
                headers.set("Content-Length", data.len().to_string());
                Ok(EncodedBody {
                    payload: EncodedPayload::Bytes(data),
                    headers,
                })
            }
            Self::Json(value) => {
                let data = serde_json::to_vec(value)?;
                let mut headers = HeaderSet::new();
                headers.set("Content-Type", "application/json; charset=utf-8");
                headers.set("Content-Length", data.len().to_string());
                Ok(EncodedBody {
                    payload: EncodedPayload::Bytes(Bytes::from(data)),
                    headers,
                })
            }
            Self::FormUrlEncoded(params) => {
                let data = Bytes::from(params.encode().into_bytes());
                let mut headers = HeaderSet::new();
                headers.set(
                    "Content-Type",
                    "application/x-www-form-urlencoded; charset=utf-8",
                );
                headers.set("Content-Length", data.len().to_string());
                Ok(EncodedBody {
                    payload: EncodedPayload::Bytes(data),
                    headers,
                })
            }
            Self::Multipart(form) => {
                let data = Bytes::from(form.encode()?);
                let mut headers = HeaderSet::new();
                headers.set("Content-Type", form.content_type());
                headers.set("Content-Length", data.len().to_string());
                Ok(EncodedBody {
                    payload: EncodedPayload::Bytes(data),
                    headers,
                })
            }
            Self::Stream(source) => {
                let mut headers = HeaderSet::new();
                headers.set("Content-Length", source.length().to_string());
                headers.set("Connection", "Keep-Alive");
                Ok(EncodedBody {
                    payload: EncodedPayload::Stream(source.clone()),
                    headers,
                })
            }
        }
    }
}

/// A serialized body ready for dispatch.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub payload: EncodedPayload,
    pub headers: HeaderSet,
}

/// Wire payload: nothing, bytes, or a replayable stream source.
#[derive(Debug, Clone, Default)]
pub enum EncodedPayload {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(StreamSource),
}

impl EncodedPayload {
    /// In-memory view of the payload, when one exists.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Empty => None,
            Self::Bytes(data) => Some(data),
            Self::Stream(source) => source.as_bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_is_lazy_and_deterministic() {
        let body = Body::json_value(serde_json::json!({"a": 1, "b": true}));
        let encoded = body.encode().unwrap();
        assert_eq!(
            encoded.payload.as_bytes().unwrap().as_ref(),
            br#"{"a":1,"b":true}"#
        );
        assert_eq!(
            encoded.headers.get("content-type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(encoded.headers.get("content-length"), Some("16"));
    }

    #[test]
    fn typed_json_round_trips() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            a: i32,
            b: bool,
        }
        let value = Payload { a: 1, b: true };
        let body = Body::json(&value).unwrap();
        let encoded = body.encode().unwrap();
        let back: Payload =
            serde_json::from_slice(encoded.payload.as_bytes().unwrap()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn form_body_emits_urlencoded_headers() {
        let body = Body::form(FormParams::new().with("a", "b c"));
        let encoded = body.encode().unwrap();
        assert_eq!(
            encoded.headers.get("content-type"),
            Some("application/x-www-form-urlencoded; charset=utf-8")
        );
        assert_eq!(encoded.payload.as_bytes().unwrap().as_ref(), b"a=b%20c");
    }

    #[test]
    fn stream_body_keeps_connection_alive() {
        let body = Body::stream_bytes(&b"chunked"[..]);
        let encoded = body.encode().unwrap();
        assert_eq!(encoded.headers.get("connection"), Some("Keep-Alive"));
        assert_eq!(encoded.headers.get("content-length"), Some("7"));
        assert!(matches!(encoded.payload, EncodedPayload::Stream(_)));
    }

    #[test]
    fn empty_body_adds_no_headers() {
        let encoded = Body::Empty.encode().unwrap();
        assert!(encoded.headers.is_empty());
        assert!(encoded.payload.is_empty());
    }

    #[test]
    fn text_body_defaults_to_plain_utf8() {
        let encoded = Body::text("hei").encode().unwrap();
        assert_eq!(
            encoded.headers.get("content-type"),
            Some("text/plain; charset=utf-8")
        );
    }
}
