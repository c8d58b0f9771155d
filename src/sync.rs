//! Full reconciliation passes and live watch mode

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::MirrorConfig;
use crate::diff::{diff, LocalFingerprints};
use crate::error::Result;
use crate::events::EventAdapter;
use crate::executor::{ActionExecutor, NameLocks};
use crate::listing::{collect_local, collect_remote};
use crate::remote::RemoteStore;
use crate::types::{ActionKind, PassReport, PassStatus, ReconciliationPlan};

/// One mirrored directory bound to a remote store
pub struct Mirror {
    store: Arc<dyn RemoteStore>,
    local_dir: PathBuf,
    fingerprint_timeout: Duration,
    executor: ActionExecutor,
}

impl Mirror {
    pub fn new(config: &MirrorConfig, store: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;
        let local_dir = config.local_path();
        let executor = ActionExecutor::new(
            store.clone(),
            local_dir.clone(),
            config.concurrency,
            NameLocks::new(),
        );

        Ok(Self {
            store,
            local_dir,
            fingerprint_timeout: config.fingerprint_timeout(),
            executor,
        })
    }

    /// Build a mirror backed by the Dropbox API
    #[cfg(feature = "dropbox")]
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let client = crate::remote::DropboxClient::from_config(config)?;
        Self::new(config, Arc::new(client))
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Collect both listings and compute the plan without applying it
    pub async fn plan(&self) -> Result<ReconciliationPlan> {
        let remote = collect_remote(self.store.as_ref()).await?;
        let local = collect_local(&self.local_dir).await?;
        tracing::info!(
            remote = remote.len(),
            local = local.len(),
            "Collected listings"
        );

        let oracle = LocalFingerprints::new(self.local_dir.clone(), self.fingerprint_timeout);
        diff(&remote, local.names(), &oracle).await
    }

    /// Run one full reconciliation pass.
    ///
    /// Listing and fingerprint errors abort the pass before any action runs.
    /// Action failures are recorded in the report and reflected in its status.
    pub async fn full_sync(&self) -> Result<PassReport> {
        let pass_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(%pass_id, dir = %self.local_dir.display(), "Full sync started");

        let plan = match self.plan().await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(%pass_id, error = %e, "Full sync aborted");
                return Err(e);
            }
        };
        tracing::info!(
            %pass_id,
            create = plan.count(ActionKind::Create),
            update = plan.count(ActionKind::Update),
            delete = plan.count(ActionKind::Delete),
            "Plan ready"
        );

        let outcomes = self.executor.apply(&plan).await;
        let report = PassReport {
            pass_id,
            plan,
            outcomes,
            started_at,
            completed_at: Utc::now(),
        };

        match report.status() {
            PassStatus::Finished => tracing::info!(%pass_id, "{}", report.status()),
            PassStatus::FinishedWithErrors => tracing::warn!(
                %pass_id,
                failed = report.failures().count(),
                "{}",
                report.status()
            ),
        }
        Ok(report)
    }

    /// Adapter applying live events through this mirror's executor
    pub fn event_adapter(
        &self,
    ) -> (
        EventAdapter,
        tokio::sync::mpsc::UnboundedReceiver<crate::types::EventFailure>,
    ) {
        EventAdapter::new(self.executor.clone())
    }

    /// Apply live changes of the local directory until the watcher stops.
    ///
    /// Shares per-name locks with `full_sync`, so a pass running at the same
    /// time never touches a name an event is working on.
    #[cfg(feature = "watcher")]
    pub async fn watch(&self) -> Result<()> {
        let (_watcher, mut events) = crate::events::watch_directory(&self.local_dir)?;
        let (adapter, mut failures) = self.event_adapter();

        let failure_log = tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                tracing::warn!(
                    name = %failure.event.name,
                    kind = ?failure.event.kind,
                    error = %failure.error,
                    "Live change not applied"
                );
            }
        });

        while let Some(event) = events.recv().await {
            adapter.handle(event);
        }

        drop(adapter);
        let _ = failure_log.await;
        tracing::info!("Watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use crate::hash::fingerprint_bytes;
    use crate::remote::{MemoryStore, StoreOp};
    use crate::types::Action;
    use pretty_assertions::assert_eq;

    fn mirror_for(dir: &Path, store: Arc<MemoryStore>) -> Mirror {
        let config = MirrorConfig::new("token", dir.to_str().unwrap());
        Mirror::new(&config, store).unwrap()
    }

    #[tokio::test]
    async fn test_full_sync_example() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"X").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"Y").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.insert_file("b.txt", "Y");
        store.insert_file("c.txt", "Z");

        let mirror = mirror_for(dir.path(), store.clone());
        let report = mirror.full_sync().await.unwrap();

        assert_eq!(
            report.plan.actions(),
            &[Action::create("a.txt"), Action::delete("c.txt")]
        );
        assert_eq!(report.status(), PassStatus::Finished);
        assert_eq!(store.names(), vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(store.contents("a.txt"), Some(b"X".to_vec()));
    }

    #[tokio::test]
    async fn test_second_pass_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one"), b"1").unwrap();
        std::fs::write(dir.path().join("two"), vec![7u8; 10_000]).unwrap();

        let store = Arc::new(MemoryStore::with_page_size(1));
        store.insert_file("two", "outdated");
        store.insert_file("zombie", "z");

        let mirror = mirror_for(dir.path(), store.clone());
        let first = mirror.full_sync().await.unwrap();
        assert_eq!(first.plan.len(), 3);

        store.clear_ops();
        let second = mirror.full_sync().await.unwrap();
        assert!(second.plan.is_empty());
        assert!(store.mutations().is_empty());
        assert_eq!(
            store.contents("two").map(|c| fingerprint_bytes(&c)),
            Some(fingerprint_bytes(&[7u8; 10_000]))
        );
    }

    #[tokio::test]
    async fn test_action_failure_marks_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok"), b"1").unwrap();
        std::fs::write(dir.path().join("bad"), b"2").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_on("/bad");

        let report = mirror_for(dir.path(), store.clone()).full_sync().await.unwrap();
        assert_eq!(report.status(), PassStatus::FinishedWithErrors);
        let failed: Vec<_> = report.failures().map(|o| o.action.name.clone()).collect();
        assert_eq!(failed, vec!["bad".to_string()]);
        assert_eq!(store.contents("ok"), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_listing_error_aborts_before_actions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();

        let store = Arc::new(MemoryStore::with_page_size(1));
        store.insert_file("x", "1");
        store.insert_file("y", "2");
        store.fail_continue();

        let result = mirror_for(dir.path(), store.clone()).full_sync().await;
        assert!(result.is_err());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_plan_is_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();
        let store = Arc::new(MemoryStore::new());

        let plan = mirror_for(dir.path(), store.clone()).plan().await.unwrap();
        assert_eq!(plan.actions(), &[Action::create("a")]);
        assert!(store.mutations().is_empty());
        assert_eq!(store.ops(), vec![StoreOp::ListFolder(String::new())]);
    }

    #[tokio::test]
    async fn test_event_and_pass_share_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_for(dir.path(), store);
        let (adapter, _failures) = mirror.event_adapter();

        // Lock held by the pass side blocks the event side for the same name
        let guard = mirror.executor().locks().lock("shared").await;
        let handle = adapter.handle(crate::types::ChangeEvent::removed("shared")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MirrorConfig::default();
        let result = Mirror::new(&config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(MirrorError::Config(_))));
    }
}
