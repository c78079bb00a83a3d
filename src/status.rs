//! Serializable view of the active configuration.
//!
//! Built field by field from the model accessors so the output stays stable
//! when internal representations change.

use crate::declaration::{Declaration, HeaderList, RequestPattern, ResponseSpec};
use crate::store::ConfigurationSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestCounters {
    pub total: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub content_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub requests: RequestCounters,
    pub stubs: Vec<StubStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StubStatus {
    pub id: String,
    pub request: RequestStatus,
    pub responses: Vec<ResponseStatus>,
    /// Index the next match will serve
    pub next_response: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStatus {
    pub methods: Vec<String>,
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "HeaderList::is_empty")]
    pub headers: HeaderList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseStatus {
    pub index: usize,
    pub status: u16,
    #[serde(skip_serializing_if = "HeaderList::is_empty")]
    pub headers: HeaderList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl StatusReport {
    pub fn capture(snapshot: &ConfigurationSnapshot, requests: RequestCounters) -> Self {
        Self {
            generation: snapshot.generation(),
            loaded_at: snapshot.loaded_at(),
            source: snapshot.source().map(|path| path.display().to_string()),
            requests,
            stubs: snapshot
                .declarations()
                .iter()
                .map(|declaration| StubStatus::capture(snapshot, declaration))
                .collect(),
        }
    }
}

impl StubStatus {
    fn capture(snapshot: &ConfigurationSnapshot, declaration: &Declaration) -> Self {
        Self {
            id: declaration.id().to_string(),
            request: RequestStatus::from(declaration.request()),
            responses: declaration
                .responses()
                .iter()
                .enumerate()
                .map(|(index, response)| ResponseStatus::capture(index, response))
                .collect(),
            next_response: snapshot.cursor().peek(declaration.id()).unwrap_or(0),
        }
    }
}

impl From<&RequestPattern> for RequestStatus {
    fn from(pattern: &RequestPattern) -> Self {
        Self {
            methods: pattern.methods().to_vec(),
            url: pattern.url().as_str().to_string(),
            query: pattern
                .query()
                .iter()
                .map(|(name, value)| (name.clone(), value.as_str().to_string()))
                .collect(),
            headers: pattern
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.as_str().to_string()))
                .collect(),
            post: pattern.post().map(|post| post.as_str().to_string()),
        }
    }
}

impl ResponseStatus {
    fn capture(index: usize, response: &ResponseSpec) -> Self {
        let body = response.body();
        Self {
            index,
            status: response.status(),
            headers: response.headers().clone(),
            body_kind: body.map(|source| source.kind()),
            body: body.and_then(|source| source.text()).map(str::to_string),
            file: body
                .and_then(|source| source.file())
                .map(|path| path.display().to_string()),
            latency_ms: response.latency().map(|latency| latency.as_millis() as u64),
        }
    }
}
