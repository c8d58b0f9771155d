//! Action executor
//!
//! Applies a plan in two phases: every upload (create or update) runs to
//! completion before the first delete starts. Within a phase actions keep plan
//! order and run `concurrency` at a time. A failing action is logged and
//! recorded but never stops its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::remote::RemoteStore;
use crate::types::{
    is_ignored, remote_path, Action, ActionKind, ActionOutcome, ReconciliationPlan,
};

/// Per-name async locks shared by full passes and live events.
///
/// Holding a name's lock guarantees no other upload or delete of that name
/// runs at the same time.
#[derive(Clone, Default)]
pub struct NameLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, name: &str) -> NameGuard {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        NameGuard {
            guard: Some(mutex.lock_owned().await),
            name: name.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of names with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Guard for one name; drops the lock entry once nobody else waits on it
pub struct NameGuard {
    guard: Option<OwnedMutexGuard<()>>,
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map holds the mutex once no task waits on it
        self.locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Applies actions against a remote store
#[derive(Clone)]
pub struct ActionExecutor {
    store: Arc<dyn RemoteStore>,
    local_dir: PathBuf,
    concurrency: usize,
    locks: NameLocks,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        local_dir: impl Into<PathBuf>,
        concurrency: usize,
        locks: NameLocks,
    ) -> Self {
        Self {
            store,
            local_dir: local_dir.into(),
            concurrency: concurrency.max(1),
            locks,
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn locks(&self) -> &NameLocks {
        &self.locks
    }

    /// Apply every action of `plan`, uploads first, returning one outcome per action
    pub async fn apply(&self, plan: &ReconciliationPlan) -> Vec<ActionOutcome> {
        let mut outcomes = self.run_phase(plan.uploads()).await;
        outcomes.extend(self.run_phase(plan.deletes()).await);
        outcomes
    }

    async fn run_phase<'a>(&self, actions: impl Iterator<Item = &'a Action>) -> Vec<ActionOutcome> {
        stream::iter(actions)
            .map(|action| async move {
                let error = self.apply_one(action).await.err().map(|e| e.to_string());
                ActionOutcome {
                    action: action.clone(),
                    error,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Apply a single action while holding its name's lock
    pub async fn apply_one(&self, action: &Action) -> Result<()> {
        let _guard = self.locks.lock(&action.name).await;

        let result = match action.kind {
            ActionKind::Create | ActionKind::Update => self.upload(&action.name).await,
            ActionKind::Delete => self.delete(&action.name).await,
        };

        if let Err(e) = &result {
            tracing::error!(name = %action.name, kind = %action.kind, error = %e, "Action failed");
        }
        result
    }

    async fn upload(&self, name: &str) -> Result<()> {
        let contents = tokio::fs::read(self.local_dir.join(name)).await?;
        let size = contents.len();
        tracing::info!(name, size, "Uploading");
        self.store.upload(&remote_path(name), contents).await?;
        tracing::info!(name, "Uploaded");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        // A file that came back since the plan was made belongs to a live event now
        let reappeared = tokio::fs::metadata(self.local_dir.join(name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if reappeared && !is_ignored(name) {
            tracing::info!(name, "Skipping delete, file exists locally again");
            return Ok(());
        }

        tracing::info!(name, "Removing");
        self.store.delete(&remote_path(name)).await?;
        tracing::info!(name, "Removed");
        Ok(())
    }
}
