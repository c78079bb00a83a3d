//! Main stub server implementation.

use crate::config::{self, ServerSettings};
use crate::content;
use crate::declaration::HeaderList;
use crate::error::{ConfigError, StubError};
use crate::matcher::{self, InboundRequest};
use crate::status::{RequestCounters, StatusReport};
use crate::store::{ConfigurationSnapshot, ConfigurationStore};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Response produced for a matched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedResponse {
    pub declaration_id: String,
    pub sequence_index: usize,
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub latency: Option<Duration>,
}

/// What the transport writes back, for matches and failures alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub latency: Option<Duration>,
    /// Set when a declaration produced the response
    pub declaration_id: Option<String>,
}

impl From<ServedResponse> for ResponseDescriptor {
    fn from(served: ServedResponse) -> Self {
        Self {
            status: served.status,
            headers: served.headers,
            body: served.body,
            latency: served.latency,
            declaration_id: Some(served.declaration_id),
        }
    }
}

impl From<&StubError> for ResponseDescriptor {
    fn from(err: &StubError) -> Self {
        let body = match err {
            StubError::NoMatch(no_match) => serde_json::json!({
                "error": "not_found",
                "message": no_match.to_string(),
                "request": {"method": no_match.method, "path": no_match.path},
                "closest": no_match.closest,
            }),
            StubError::ContentUnavailable { declaration_id, .. } => serde_json::json!({
                "error": "content_unavailable",
                "message": err.to_string(),
                "stub_id": declaration_id,
            }),
            StubError::ConfigInvalid(_) => serde_json::json!({
                "error": "config_invalid",
                "message": err.to_string(),
            }),
        };

        let mut headers = HeaderList::new();
        headers.insert("Content-Type", "application/json");

        Self {
            status: err.status(),
            headers,
            body: serde_json::to_vec(&body).unwrap_or_default(),
            latency: None,
            declaration_id: None,
        }
    }
}

/// Seam between the HTTP transport and the stub engine.
#[async_trait]
pub trait StubHandler: Send + Sync {
    /// Answer one request; never fails, errors become error responses.
    async fn respond(&self, request: &InboundRequest) -> ResponseDescriptor;

    fn status(&self) -> StatusReport;

    /// Path reserved for the status report, if any.
    fn status_path(&self) -> Option<&str>;

    /// Largest request body the transport reads before answering 413.
    fn body_limit(&self) -> usize;
}

/// Stub server
///
/// Matches requests against the active configuration snapshot and serves
/// the configured responses.
pub struct StubServer {
    store: ConfigurationStore,
    settings: ServerSettings,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests matched to stubs.
    requests_matched: AtomicU64,
    /// Total requests unmatched.
    requests_unmatched: AtomicU64,
    /// Matched requests whose body could not be produced.
    content_failures: AtomicU64,
}

impl StubServer {
    /// Create a new stub server around an initial snapshot.
    pub fn new(snapshot: ConfigurationSnapshot, settings: ServerSettings) -> Self {
        info!(
            stubs = snapshot.len(),
            source = ?snapshot.source(),
            "Stub server initialized"
        );

        Self {
            store: ConfigurationStore::new(snapshot),
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            content_failures: AtomicU64::new(0),
        }
    }

    /// Load the initial configuration from a file.
    pub fn from_file(path: &Path, settings: ServerSettings) -> Result<Self, StubError> {
        let snapshot = config::load_snapshot(path)?;
        Ok(Self::new(snapshot, settings))
    }

    /// Create from a YAML configuration string; body files resolve against
    /// the working directory.
    pub fn from_yaml(yaml: &str) -> Result<Self, StubError> {
        let snapshot = config::parse_snapshot(yaml, None)?;
        Ok(Self::new(snapshot, ServerSettings::default()))
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// The active snapshot.
    pub fn snapshot(&self) -> Arc<ConfigurationSnapshot> {
        self.store.current_snapshot()
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    pub fn total_content_failures(&self) -> u64 {
        self.content_failures.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> RequestCounters {
        RequestCounters {
            total: self.total_requests(),
            matched: self.total_matched(),
            unmatched: self.total_unmatched(),
            content_failures: self.total_content_failures(),
        }
    }

    /// Match `request` and produce its response.
    ///
    /// The cursor advances before the body is read; a failed read does not
    /// give the sequence slot back.
    pub async fn handle(&self, request: &InboundRequest) -> Result<ServedResponse, StubError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.store.current_snapshot();
        let result = match matcher::find_match(&snapshot, request) {
            Ok(result) => result,
            Err(no_match) => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        closest = ?no_match.closest.as_ref().map(|c| &c.declaration_id),
                        "No matching stub found"
                    );
                }
                return Err(StubError::NoMatch(no_match));
            }
        };

        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        let declaration_id = result.declaration.id();
        if self.settings.log_matches {
            info!(
                stub_id = %declaration_id,
                sequence = result.sequence_index,
                method = %request.method,
                path = %request.path,
                "Request matched stub"
            );
        }

        let body = match content::resolve(result.response).await {
            Ok(body) => body,
            Err(source) => {
                self.content_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    stub_id = %declaration_id,
                    path = %source.path.display(),
                    error = %source.source,
                    "Response body unavailable"
                );
                return Err(StubError::ContentUnavailable {
                    declaration_id: declaration_id.to_string(),
                    source,
                });
            }
        };

        Ok(ServedResponse {
            declaration_id: declaration_id.to_string(),
            sequence_index: result.sequence_index,
            status: result.response.status(),
            headers: result.response.headers().clone(),
            body,
            latency: result.response.latency(),
        })
    }

    /// Like [`StubServer::handle`], with errors turned into responses.
    pub async fn respond(&self, request: &InboundRequest) -> ResponseDescriptor {
        match self.handle(request).await {
            Ok(served) => served.into(),
            Err(err) => ResponseDescriptor::from(&err),
        }
    }

    /// Replace the configuration with `yaml`. Returns the new generation.
    ///
    /// On error the active snapshot, including its cursor positions, stays
    /// in force.
    pub fn reload_from_yaml(&self, yaml: &str, base_dir: &Path) -> Result<u64, StubError> {
        let declarations = config::StubConfig::from_yaml(yaml)
            .and_then(|config| config.compile(base_dir))
            .map_err(reload_rejected)?;
        Ok(self.install(ConfigurationSnapshot::new(declarations)))
    }

    /// Replace the configuration with the document at `path`.
    pub fn reload_from_file(&self, path: &Path) -> Result<u64, StubError> {
        let snapshot = config::load_snapshot(path).map_err(reload_rejected)?;
        Ok(self.install(snapshot))
    }

    /// Replace the configuration with `yaml`, read from `source`.
    ///
    /// Relative body files resolve next to `source`, as with
    /// [`StubServer::reload_from_file`], without reading the file again.
    pub fn reload_document(&self, yaml: &str, source: &Path) -> Result<u64, StubError> {
        let snapshot = config::parse_snapshot(yaml, Some(source)).map_err(reload_rejected)?;
        Ok(self.install(snapshot))
    }

    fn install(&self, snapshot: ConfigurationSnapshot) -> u64 {
        let stubs = snapshot.len();
        let previous = self.store.replace(snapshot);
        let generation = previous.generation() + 1;
        info!(
            stubs,
            generation,
            previous_generation = previous.generation(),
            "Configuration reloaded"
        );
        debug!(
            readers = Arc::strong_count(&previous) - 1,
            "Previous configuration still referenced"
        );
        generation
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::capture(&self.snapshot(), self.counters())
    }
}

fn reload_rejected(err: ConfigError) -> StubError {
    warn!(error = %err, "Configuration reload rejected, keeping active configuration");
    StubError::ConfigInvalid(err)
}

#[async_trait]
impl StubHandler for StubServer {
    async fn respond(&self, request: &InboundRequest) -> ResponseDescriptor {
        StubServer::respond(self, request).await
    }

    fn status(&self) -> StatusReport {
        StubServer::status(self)
    }

    fn status_path(&self) -> Option<&str> {
        self.settings.status_path.as_deref()
    }

    fn body_limit(&self) -> usize {
        self.settings.max_body_bytes
    }
}
