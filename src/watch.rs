//! Reload the configuration when its file changes.
//!
//! Change notifications come from `notify`, watching the file's directory so
//! editors that replace the file instead of writing in place are picked up
//! too. Each notification re-reads the file once; the bytes that were read
//! are the bytes that get compiled.

use crate::server::StubServer;
use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Unchanged,
    /// New configuration installed with the given generation
    Reloaded(u64),
    /// File changed but did not compile; the active configuration stays
    Rejected,
    Unreadable,
}

pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_seen: Option<String>,
}

impl ConfigWatcher {
    /// `poll_interval` applies when the platform watcher falls back to polling.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            last_seen: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current content without reloading.
    ///
    /// Call this after the initial load so the first notification does not
    /// reload the document that is already active.
    pub async fn prime(&mut self) {
        self.last_seen = tokio::fs::read_to_string(&self.path).await.ok();
    }

    /// Read the file and reload if its content differs from the last read.
    pub async fn reload_if_changed(&mut self, server: &StubServer) -> WatchOutcome {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "Configuration file unreadable");
                return WatchOutcome::Unreadable;
            }
        };

        if self.last_seen.as_deref() == Some(content.as_str()) {
            return WatchOutcome::Unchanged;
        }
        // truncated mid-write; the write that follows sends another event
        if content.trim().is_empty() {
            debug!(path = %self.path.display(), "Configuration file empty, waiting for content");
            return WatchOutcome::Unchanged;
        }

        info!(path = %self.path.display(), "Configuration file changed");
        let outcome = match server.reload_document(&content, &self.path) {
            Ok(generation) => WatchOutcome::Reloaded(generation),
            Err(_) => WatchOutcome::Rejected,
        };
        self.last_seen = Some(content);
        outcome
    }

    /// Whether `event` may have changed the watched file.
    fn concerns(&self, event: &Event) -> bool {
        let relevant = matches!(
            event.kind,
            EventKind::Create(_)
                | EventKind::Modify(_)
                | EventKind::Remove(_)
                | EventKind::Access(AccessKind::Close(AccessMode::Write))
        );
        relevant
            && event
                .paths
                .iter()
                .any(|path| path.file_name() == self.path.file_name())
    }

    /// Watch the file until the task is dropped.
    ///
    /// Fails only if the platform watcher cannot be set up.
    pub async fn run(mut self, server: Arc<StubServer>) -> Result<(), notify::Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => {
                    warn!(error = %err, "Configuration watcher error");
                }
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!(path = %self.path.display(), "Watching configuration file");

        // changes made before the watch was registered
        self.react(&server).await;

        while let Some(event) = rx.recv().await {
            let mut pending = self.concerns(&event);
            while let Ok(event) = rx.try_recv() {
                pending |= self.concerns(&event);
            }
            if pending {
                self.react(&server).await;
            }
        }

        Ok(())
    }

    async fn react(&mut self, server: &StubServer) {
        if self.reload_if_changed(server).await == WatchOutcome::Unreadable {
            warn!(path = %self.path.display(), "Keeping active configuration, file unreadable");
        }
    }
}
