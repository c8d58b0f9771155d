//! Diff engine: classify every name as create, update, delete or unchanged
//!
//! Names are matched by identity only. A file that moved to a new name shows
//! up as one create plus one delete, never as a move.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MirrorError, Result};
use crate::hash::fingerprint_file_with_timeout;
use crate::listing::RemoteListing;
use crate::types::{Action, ReconciliationPlan};

/// Source of local content fingerprints, queried lazily by the diff
#[async_trait]
pub trait FingerprintOracle: Send + Sync {
    async fn fingerprint(&self, name: &str) -> Result<String>;
}

/// Fingerprints files in the mirrored directory
pub struct LocalFingerprints {
    dir: PathBuf,
    timeout: Duration,
}

impl LocalFingerprints {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FingerprintOracle for LocalFingerprints {
    async fn fingerprint(&self, name: &str) -> Result<String> {
        fingerprint_file_with_timeout(&self.dir.join(name), self.timeout).await
    }
}

/// Precomputed fingerprints, keyed by name
#[async_trait]
impl FingerprintOracle for HashMap<String, String> {
    async fn fingerprint(&self, name: &str) -> Result<String> {
        self.get(name)
            .cloned()
            .ok_or_else(|| MirrorError::Internal(format!("no fingerprint for {}", name)))
    }
}

/// Compute the plan that makes `remote` mirror `local`.
///
/// Local names are evaluated first, in the order given; names missing remotely
/// become creates, names whose fingerprint differs from the remote content hash
/// become updates. Remote entries never matched by a local name then become
/// deletes, in listing order. Fingerprints are only computed for names present
/// on both sides; a fingerprint error aborts the whole diff.
pub async fn diff<'a, I>(
    remote: &RemoteListing,
    local: I,
    oracle: &dyn FingerprintOracle,
) -> Result<ReconciliationPlan>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut plan = ReconciliationPlan::new();
    let mut matched: HashSet<&str> = HashSet::new();

    for name in local {
        if !matched.insert(name) {
            continue;
        }

        let Some(entry) = remote.get(name) else {
            plan.push(Action::create(name));
            continue;
        };

        let local_hash = oracle.fingerprint(name).await?;
        if entry.content_hash.as_deref() != Some(local_hash.as_str()) {
            tracing::debug!(name, "Content differs from remote");
            plan.push(Action::update(name));
        }
    }

    for entry in remote.iter() {
        if !matched.contains(entry.name.as_str()) {
            plan.push(Action::delete(entry.name.clone()));
        }
    }

    Ok(plan)
}
