//! Configuration for the stub server.
//!
//! The configuration document is a YAML list of request/response entries.
//! Loading parses the whole document, validates every entry and compiles it
//! into [`Declaration`]s; nothing partial ever reaches the store.

use crate::builder::{DeclarationBuilder, RequestPatternBuilder, ResponseSpecBuilder};
use crate::declaration::{Declaration, HeaderList, ScalarValue};
use crate::error::{ConfigError, FieldError};
use crate::store::ConfigurationSnapshot;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// A parsed configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StubConfig {
    pub stubs: Vec<StubEntry>,
}

impl StubConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text. An empty document has no stubs.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration without keeping the result.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile(Path::new(".")).map(|_| ())
    }

    /// Compile every entry into a declaration.
    ///
    /// Relative `file` references are resolved against `base_dir`.
    pub fn compile(&self, base_dir: &Path) -> Result<Vec<Declaration>, ConfigError> {
        let mut seen = HashSet::new();
        let mut declarations = Vec::with_capacity(self.stubs.len());

        for (index, entry) in self.stubs.iter().enumerate() {
            let declaration = entry.compile(index, base_dir)?;
            if !seen.insert(declaration.id().to_string()) {
                return Err(ConfigError::DuplicateId(declaration.id().to_string()));
            }
            declarations.push(declaration);
        }

        Ok(declarations)
    }
}

/// One request/response entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubEntry {
    /// Resource id; defaults to `stub-<index>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub request: RequestDefinition,

    /// A single response map or a list of them. Kept as raw YAML so that
    /// errors inside a response can name the entry and position.
    pub response: serde_yaml::Value,
}

impl StubEntry {
    pub fn resource_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("stub-{}", index))
    }

    /// Typed response definitions, in sequence order.
    pub fn responses(&self) -> Result<Vec<ResponseDefinition>, FieldError> {
        match &self.response {
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    ResponseDefinition::from_value(item, &format!("response[{}]", position))
                })
                .collect(),
            serde_yaml::Value::Mapping(_) => {
                Ok(vec![ResponseDefinition::from_value(&self.response, "response")?])
            }
            serde_yaml::Value::Null => Ok(Vec::new()),
            _ => Err(FieldError::new(
                "response",
                "expected a response map or a list of responses",
            )),
        }
    }

    fn compile(&self, index: usize, base_dir: &Path) -> Result<Declaration, ConfigError> {
        let id = self.resource_id(index);

        let request = self
            .request
            .to_pattern()
            .map_err(|e| ConfigError::field(&id, e.within("request")))?;

        let responses = self.responses().map_err(|e| ConfigError::field(&id, e))?;
        if responses.is_empty() {
            return Err(ConfigError::field(
                &id,
                FieldError::new("response", "at least one response is required"),
            ));
        }

        let sequenced = self.response.is_sequence();
        let mut builder = DeclarationBuilder::new(&id).request(request);
        for (position, definition) in responses.iter().enumerate() {
            let field = if sequenced {
                format!("response[{}]", position)
            } else {
                "response".to_string()
            };
            if let (Some(body), Some(file)) = (&definition.body, &definition.file) {
                warn!(
                    stub_id = %id,
                    response = %field,
                    file = %file,
                    ignored_body = %body.clone().into_string(),
                    "Response declares both body and file, serving the file"
                );
            }
            let spec = definition
                .to_spec(base_dir)
                .map_err(|e| ConfigError::field(&id, e.within(&field)))?;
            builder = builder.response(spec);
        }
        builder.build()
    }
}

/// HTTP verb list; a single verb may be written without brackets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodList {
    One(String),
    Many(Vec<String>),
}

impl MethodList {
    pub fn verbs(&self) -> &[String] {
        match self {
            MethodList::One(verb) => std::slice::from_ref(verb),
            MethodList::Many(verbs) => verbs,
        }
    }
}

/// Request side of an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    pub method: MethodList,

    /// Literal path or regex
    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, ScalarValue>,

    #[serde(default, skip_serializing_if = "HeaderList::is_empty")]
    pub headers: HeaderList,

    /// Expected request body, literal or regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<ScalarValue>,
}

impl RequestDefinition {
    fn to_pattern(&self) -> Result<crate::declaration::RequestPattern, FieldError> {
        let mut builder = RequestPatternBuilder::new(&self.url).methods(self.method.verbs());

        for (name, value) in &self.query {
            builder = builder.query(name, value.clone().into_string());
        }
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, expand_authorization(name, value));
        }
        if let Some(post) = &self.post {
            builder = builder.post(post.clone().into_string());
        }

        builder.build()
    }
}

/// `authorization: user:secret` is shorthand for HTTP basic credentials.
fn expand_authorization(name: &str, value: &str) -> String {
    if name.eq_ignore_ascii_case("authorization") && value.contains(':') && !value.contains(' ') {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(value)
        )
    } else {
        value.to_string()
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default, skip_serializing_if = "HeaderList::is_empty")]
    pub headers: HeaderList,

    /// Inline body; multi-line text is kept as a folded body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ScalarValue>,

    /// Body file, relative to the configuration document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Delay before responding, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    fn from_value(value: &serde_yaml::Value, field: &str) -> Result<Self, FieldError> {
        serde_yaml::from_value(value.clone()).map_err(|e| FieldError::new(field, e.to_string()))
    }

    fn to_spec(&self, base_dir: &Path) -> Result<crate::declaration::ResponseSpec, FieldError> {
        let mut builder = ResponseSpecBuilder::new()
            .status(self.status)
            .headers(self.headers.clone());

        let body = self.body.clone().map(ScalarValue::into_string);
        builder = match (body, &self.file) {
            (_, Some(file)) if file.trim().is_empty() => {
                return Err(FieldError::new("file", "must not be empty"))
            }
            // a file wins over an inline body
            (_, Some(file)) => builder.file(resolve_path(base_dir, file)),
            (Some(body), None) if body.contains('\n') => builder.folded_body(body),
            (Some(body), None) => builder.body(body),
            (None, None) => builder,
        };

        if let Some(latency) = self.latency {
            builder = builder.latency(Duration::from_millis(latency));
        }

        builder.build()
    }
}

fn resolve_path(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Runtime switches for the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Log all matched stubs
    pub log_matches: bool,

    /// Log unmatched requests
    pub log_unmatched: bool,

    /// Path answering `GET` with the JSON status report
    pub status_path: Option<String>,

    /// Largest request body accepted; longer bodies are answered with 413
    pub max_body_bytes: usize,
}

/// 10 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            status_path: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Parse, validate and compile a document into a snapshot.
///
/// `source` is the file the text came from; relative body files resolve
/// against its directory, or the working directory without one.
pub fn parse_snapshot(
    yaml: &str,
    source: Option<&Path>,
) -> Result<ConfigurationSnapshot, ConfigError> {
    let base_dir = source
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));
    let declarations = StubConfig::from_yaml(yaml)?.compile(base_dir)?;
    let snapshot = ConfigurationSnapshot::new(declarations);
    Ok(match source {
        Some(path) => snapshot.with_source(path),
        None => snapshot,
    })
}

/// Read and compile the document at `path`.
pub fn load_snapshot(path: &Path) -> Result<ConfigurationSnapshot, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_snapshot(&content, Some(path))
}
