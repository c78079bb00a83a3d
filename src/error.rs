//! Error types for configuration loading, matching and serving.

use crate::content::ContentUnavailable;
use crate::matcher::NoMatch;
use std::path::PathBuf;
use thiserror::Error;

/// A single invalid field inside a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid `{field}`: {reason}")]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `response[1].status`
    pub field: String,
    /// Human readable explanation
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the field path, e.g. `status` becomes `response[2].status`.
    pub fn within(self, parent: &str) -> Self {
        Self {
            field: format!("{}.{}", parent, self.field),
            reason: self.reason,
        }
    }
}

/// Errors raised while loading or validating a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("declaration '{declaration_id}': {source}")]
    InvalidField {
        declaration_id: String,
        #[source]
        source: FieldError,
    },

    #[error("duplicate declaration id '{0}'")]
    DuplicateId(String),
}

impl ConfigError {
    pub(crate) fn field(declaration_id: &str, source: FieldError) -> Self {
        ConfigError::InvalidField {
            declaration_id: declaration_id.to_string(),
            source,
        }
    }
}

/// Errors surfaced by the stub server to its transport.
#[derive(Debug, Error)]
pub enum StubError {
    /// No declaration satisfies the request.
    #[error("{0}")]
    NoMatch(NoMatch),

    /// The request matched, but the response body could not be produced.
    #[error("stub '{declaration_id}' matched but its body is unavailable: {source}")]
    ContentUnavailable {
        declaration_id: String,
        #[source]
        source: ContentUnavailable,
    },

    /// The configuration document was rejected; the active snapshot is unchanged.
    #[error("configuration rejected: {0}")]
    ConfigInvalid(#[from] ConfigError),
}

impl StubError {
    /// HTTP status the transport should answer with.
    pub fn status(&self) -> u16 {
        match self {
            StubError::NoMatch(_) => 404,
            StubError::ContentUnavailable { .. } | StubError::ConfigInvalid(_) => 500,
        }
    }
}
