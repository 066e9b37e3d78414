//! Streamed body sources
//!
//! A [`StreamSource`] can be replayed: every transport attempt asks for a
//! fresh byte stream, so retries and redirect re-sends never observe a
//! half-consumed body.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::Error;

/// Where streamed body bytes come from.
#[derive(Debug, Clone)]
pub enum StreamSource {
    File { path: PathBuf, length: u64 },
    Bytes(Bytes),
}

impl StreamSource {
    /// Stream the contents of a file. The length is captured eagerly so
    /// `Content-Length` can be emitted before the stream is opened.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let length = std::fs::metadata(&path)?.len();
        Ok(Self::File { path, length })
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn length(&self) -> u64 {
        match self {
            Self::File { length, .. } => *length,
            Self::Bytes(data) => data.len() as u64,
        }
    }

    /// In-memory payload, when there is one. File sources return `None`.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(data) => Some(data),
            Self::File { .. } => None,
        }
    }

    /// Open a fresh engine body over this source.
    pub(crate) fn to_transport_body(&self) -> reqwest::Body {
        match self {
            Self::Bytes(data) => reqwest::Body::from(data.clone()),
            Self::File { path, .. } => {
                let path = path.clone();
                let stream = async_stream::try_stream! {
                    let file = tokio::fs::File::open(&path).await?;
                    let mut chunks = tokio_util::io::ReaderStream::new(file);
                    while let Some(chunk) = chunks.next().await {
                        let chunk: Bytes = chunk?;
                        yield chunk;
                    }
                };
                let stream: futures_util::stream::BoxStream<'static, std::io::Result<Bytes>> =
                    Box::pin(stream);
                reqwest::Body::wrap_stream(stream)
            }
        }
    }
}
