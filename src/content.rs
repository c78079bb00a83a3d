//! Response body resolution.
//!
//! Inline bodies are returned as stored. File bodies are read from disk on
//! every call, so edits show up without a reload.

use crate::declaration::{BodySource, ResponseSpec};
use std::path::PathBuf;
use thiserror::Error;

/// A file-backed body could not be read.
#[derive(Debug, Error)]
#[error("cannot read response file {}: {source}", path.display())]
pub struct ContentUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Produce the body bytes for `response`.
pub async fn resolve(response: &ResponseSpec) -> Result<Vec<u8>, ContentUnavailable> {
    match response.body() {
        None => Ok(Vec::new()),
        Some(BodySource::Literal(text)) | Some(BodySource::Folded(text)) => {
            Ok(text.as_bytes().to_vec())
        }
        Some(BodySource::File(path)) => {
            tokio::fs::read(path)
                .await
                .map_err(|source| ContentUnavailable {
                    path: path.clone(),
                    source,
                })
        }
    }
}
