//! Change-event adapter
//!
//! Turns single file-system notifications into single executor calls,
//! bypassing the full-listing diff. Each event is handled on its own task;
//! bursts are not coalesced since uploads are idempotent overwrites.
//! Failures never stop the watch loop: they are logged, counted and sent on a
//! failure channel.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::executor::ActionExecutor;
use crate::types::{is_ignored, ChangeEvent, EventFailure};

/// Applies live change events through an [`ActionExecutor`]
#[derive(Clone)]
pub struct EventAdapter {
    executor: ActionExecutor,
    failures: mpsc::UnboundedSender<EventFailure>,
    failure_count: Arc<AtomicU64>,
}

impl EventAdapter {
    /// Create an adapter and the receiving end of its failure channel
    pub fn new(executor: ActionExecutor) -> (Self, mpsc::UnboundedReceiver<EventFailure>) {
        let (failures, receiver) = mpsc::unbounded_channel();
        let adapter = Self {
            executor,
            failures,
            failure_count: Arc::new(AtomicU64::new(0)),
        };
        (adapter, receiver)
    }

    /// Spawn handling of one event; returns `None` for ignored names
    pub fn handle(&self, event: ChangeEvent) -> Option<JoinHandle<()>> {
        if is_ignored(&event.name) {
            return None;
        }

        let adapter = self.clone();
        Some(tokio::spawn(async move {
            // Failures are reported through the channel and counter
            let _ = adapter.handle_and_wait(event).await;
        }))
    }

    /// Handle one event on the current task
    pub async fn handle_and_wait(&self, event: ChangeEvent) -> Result<()> {
        if is_ignored(&event.name) {
            return Ok(());
        }

        tracing::debug!(name = %event.name, kind = ?event.kind, "Change event");
        let result = self.executor.apply_one(&event.to_action()).await;

        if let Err(e) = &result {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                name = %event.name,
                kind = ?event.kind,
                error = %e,
                "Change event failed"
            );
            let _ = self.failures.send(EventFailure {
                event,
                error: e.to_string(),
            });
        }
        result
    }

    /// Number of events that failed so far
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// Name of a path directly inside `root`, if it is one
#[cfg_attr(not(feature = "watcher"), allow(dead_code))]
fn direct_child_name(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components = rel.components();
    let first = components.next()?;
    if components.next().is_some() {
        return None;
    }
    first.as_os_str().to_str().map(str::to_string)
}

#[cfg(feature = "watcher")]
pub use watch::{change_events, watch_directory};

#[cfg(feature = "watcher")]
mod watch {
    use std::path::Path;

    use notify::event::{CreateKind, ModifyKind, RenameMode};
    use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use tokio::sync::mpsc;

    use super::direct_child_name;
    use crate::error::Result;
    use crate::types::ChangeEvent;

    /// Map a notify event onto change events for files directly inside `root`
    pub fn change_events(event: &notify::Event, root: &Path) -> Vec<ChangeEvent> {
        let named = |path: &std::path::PathBuf| direct_child_name(path, root);

        match &event.kind {
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => event
                    .paths
                    .iter()
                    .filter_map(named)
                    .map(ChangeEvent::removed)
                    .collect(),
                RenameMode::To => event
                    .paths
                    .iter()
                    .filter_map(named)
                    .map(ChangeEvent::modified)
                    .collect(),
                RenameMode::Both => {
                    let mut out = Vec::new();
                    if let Some(from) = event.paths.first().and_then(named) {
                        out.push(ChangeEvent::removed(from));
                    }
                    if let Some(to) = event.paths.get(1).and_then(named) {
                        out.push(ChangeEvent::modified(to));
                    }
                    out
                }
                // Direction unknown: decide by whether the path still exists
                _ => event
                    .paths
                    .iter()
                    .filter_map(|p| {
                        named(p).map(|name| {
                            if p.exists() {
                                ChangeEvent::modified(name)
                            } else {
                                ChangeEvent::removed(name)
                            }
                        })
                    })
                    .collect(),
            },
            // Subdirectories are not mirrored
            EventKind::Create(CreateKind::Folder) => Vec::new(),
            EventKind::Create(_) | EventKind::Modify(_) => event
                .paths
                .iter()
                .filter_map(named)
                .map(ChangeEvent::modified)
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .iter()
                .filter_map(named)
                .map(ChangeEvent::removed)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Watch `dir` (non-recursively) and stream its change events.
    ///
    /// The watcher stops when the returned handle is dropped.
    pub fn watch_directory(
        dir: &Path,
    ) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = dir.canonicalize()?;
        let event_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for change in change_events(&event, &event_root) {
                        let _ = tx.send(change);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Watch error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %root.display(), "Watching for changes");
        Ok((watcher, rx))
    }
}
