//! Multipart upload bodies.
//!
//! Each file becomes one form part named `src` whose filename is the
//! forward-slash path relative to the session's working directory. Callers are
//! expected to have validated that the local files live under their base
//! directory; no traversal checks happen here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use reqwest::multipart::{Form, Part};

use crate::error::{ClientError, Result};

/// Form field name the server expects for uploaded files.
pub const UPLOAD_FIELD: &str = "src";

/// One file destined for the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub name: &'static str,
    pub filename: String,
    pub content: Vec<u8>,
}

/// An ordered set of files to upload in one request.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: Vec<UploadPart>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file from memory under its remote relative path.
    pub fn add_file(mut self, relative_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.parts.push(UploadPart {
            name: UPLOAD_FIELD,
            filename: relative_path.into(),
            content: content.into(),
        });
        self
    }

    /// Read every local file in `files` (remote relative path -> local path).
    pub async fn from_paths(files: &BTreeMap<String, PathBuf>) -> Result<Self> {
        let mut form = Self::new();
        for (relative_path, local_path) in files {
            let content = tokio::fs::read(local_path).await.map_err(|e| {
                ClientError::InvalidParameters(format!(
                    "Cannot read upload file {}: {}",
                    local_path.display(),
                    e
                ))
            })?;
            form = form.add_file(relative_path.clone(), content);
        }
        Ok(form)
    }

    pub fn parts(&self) -> &[UploadPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Build the multipart body. Filenames are sent verbatim (slashes are not percent-encoded).
    pub fn into_multipart(self) -> Form {
        self.parts
            .into_iter()
            .fold(Form::new().percent_encode_noop(), |form, part| {
                form.part(part.name, Part::bytes(part.content).file_name(part.filename))
            })
    }
}
