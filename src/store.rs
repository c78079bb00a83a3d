//! Active configuration snapshot with atomic replacement.

use crate::declaration::Declaration;
use crate::sequence::SequenceCursor;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Immutable declarations plus the cursors that belong to them.
#[derive(Debug)]
pub struct ConfigurationSnapshot {
    declarations: Vec<Declaration>,
    cursor: SequenceCursor,
    generation: u64,
    loaded_at: DateTime<Utc>,
    source: Option<PathBuf>,
}

impl ConfigurationSnapshot {
    pub fn new(declarations: Vec<Declaration>) -> Self {
        let cursor = SequenceCursor::new(&declarations);
        Self {
            declarations,
            cursor,
            generation: 0,
            loaded_at: Utc::now(),
            source: None,
        }
    }

    /// Record the document this snapshot was loaded from.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// Declarations in configuration order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn declaration(&self, id: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.id() == id)
    }

    pub fn cursor(&self) -> &SequenceCursor {
        &self.cursor
    }

    /// Incremented by the store on every replacement; 0 until installed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

impl Default for ConfigurationSnapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Holds exactly one active snapshot.
///
/// Readers take an `Arc` without locking. A replacement swaps the pointer;
/// readers that already hold the previous snapshot finish against it.
/// Replacements are serialized so generations become active in order.
pub struct ConfigurationStore {
    active: ArcSwap<ConfigurationSnapshot>,
    writer: Mutex<()>,
}

impl ConfigurationStore {
    pub fn new(mut initial: ConfigurationSnapshot) -> Self {
        initial.generation = 1;
        Self {
            active: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
        }
    }

    pub fn current_snapshot(&self) -> Arc<ConfigurationSnapshot> {
        self.active.load_full()
    }

    /// Install `snapshot` and return the one it replaced.
    ///
    /// The installed snapshot's generation is always the previous one plus 1.
    pub fn replace(&self, mut snapshot: ConfigurationSnapshot) -> Arc<ConfigurationSnapshot> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.generation = self.active.load().generation + 1;
        self.active.swap(Arc::new(snapshot))
    }

    /// Generation of the active snapshot.
    pub fn generation(&self) -> u64 {
        self.active.load().generation
    }
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        Self::new(ConfigurationSnapshot::default())
    }
}
