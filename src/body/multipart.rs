//! Multipart form bodies
//!
//! Hand-assembled `multipart/form-data` encoding so stubbed and real
//! requests share byte-identical output: serialization is deterministic
//! given the same parts and boundary id.

use std::path::Path;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::Error;
use crate::headers::HeaderSet;

const CRLF: &[u8] = b"\r\n";

/// One part of a multipart form.
#[derive(Debug, Clone)]
pub struct Part {
    headers: HeaderSet,
    payload: PartPayload,
    length: u64,
}

#[derive(Debug, Clone)]
enum PartPayload {
    Bytes(Bytes),
    File(std::path::PathBuf),
}

impl Part {
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

/// A `multipart/form-data` body under construction.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    preamble: Option<String>,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// New form with a process-unique random boundary id.
    pub fn new() -> Self {
        Self::with_boundary(format!("wiretap.boundary.{}", Uuid::new_v4().simple()))
    }

    /// New form with a caller-chosen boundary id.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            preamble: None,
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Free text emitted ahead of the first delimiter.
    pub fn set_preamble(&mut self, text: impl Into<String>) -> &mut Self {
        self.preamble = Some(text.into());
        self
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Add a plain text field.
    pub fn add_string(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        let mut headers = HeaderSet::new();
        headers.set(
            "Content-Disposition",
            format!("form-data; name=\"{}\"", escape_quoted(name)),
        );
        let data = Bytes::from(value.into_bytes());
        let length = data.len() as u64;
        self.parts.push(Part {
            headers,
            payload: PartPayload::Bytes(data),
            length,
        });
        self
    }

    /// Add a field carrying raw bytes, optionally presented as a file.
    pub fn add_bytes(
        &mut self,
        name: &str,
        data: impl Into<Bytes>,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> &mut Self {
        let data = data.into();
        let mut headers = HeaderSet::new();
        headers.set("Content-Disposition", disposition(name, filename));
        if let Some(ct) = content_type {
            headers.set("Content-Type", ct);
        }
        let length = data.len() as u64;
        self.parts.push(Part {
            headers,
            payload: PartPayload::Bytes(data),
            length,
        });
        self
    }

    /// Add a field streaming a file from disk. The filename defaults to the
    /// file's name and the content type is guessed from the extension.
    pub fn add_file(&mut self, name: &str, path: impl AsRef<Path>) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let metadata =
            std::fs::metadata(path).map_err(|_| Error::MultipartInvalidFile(path.to_path_buf()))?;
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| Error::MultipartInvalidFile(path.to_path_buf()))?
            .to_string();

        let mut headers = HeaderSet::new();
        headers.set("Content-Disposition", disposition(name, Some(&filename)));
        if let Some(mime) = mime_guess::from_path(path).first() {
            headers.set("Content-Type", mime.essence_str());
        }
        self.parts.push(Part {
            headers,
            payload: PartPayload::File(path.to_path_buf()),
            length: metadata.len(),
        });
        Ok(self)
    }

    /// `Content-Type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Serialize the form:
    /// `[preamble CRLF CRLF]? (--B CRLF headers CRLF CRLF payload CRLF)* --B--`
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.encoded_size_hint());
        if let Some(preamble) = &self.preamble {
            out.extend_from_slice(preamble.as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(CRLF);
        }
        for part in &self.parts {
            out.extend_from_slice(format!("--{}", self.boundary).as_bytes());
            out.extend_from_slice(CRLF);
            for header in part.headers.iter() {
                out.extend_from_slice(format!("{}: {}", header.name(), header.value()).as_bytes());
                out.extend_from_slice(CRLF);
            }
            out.extend_from_slice(CRLF);
            match &part.payload {
                PartPayload::Bytes(data) => out.extend_from_slice(data),
                PartPayload::File(path) => {
                    let data = std::fs::read(path)
                        .map_err(|_| Error::MultipartInvalidFile(path.clone()))?;
                    out.extend_from_slice(&data);
                }
            }
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(format!("--{}--", self.boundary).as_bytes());
        Ok(out)
    }

    fn encoded_size_hint(&self) -> usize {
        let per_part = self.boundary.len() + 64;
        self.parts
            .iter()
            .map(|p| p.length as usize + per_part)
            .sum::<usize>()
            + self.boundary.len()
            + 8
    }
}

fn disposition(name: &str, filename: Option<&str>) -> String {
    match filename {
        Some(filename) => format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quoted(name),
            escape_quoted(filename)
        ),
        None => format!("form-data; name=\"{}\"", escape_quoted(name)),
    }
}

fn escape_quoted(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
