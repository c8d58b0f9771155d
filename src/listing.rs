//! Remote and local listing collection
//!
//! Both sides are collected in full before anything is compared. Any error
//! while listing aborts the pass; partial listings are never returned.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MirrorError, Result};
use crate::remote::RemoteStore;
use crate::types::{is_ignored, LocalEntry, RemoteEntry};

/// Remote entries keyed by name, remembering listing order
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    entries: Vec<RemoteEntry>,
    index: HashMap<String, usize>,
}

impl RemoteListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; a repeated name replaces the earlier entry in place
    pub fn insert(&mut self, entry: RemoteEntry) {
        match self.index.get(&entry.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RemoteEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entries in listing order
    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<RemoteEntry> for RemoteListing {
    fn from_iter<I: IntoIterator<Item = RemoteEntry>>(iter: I) -> Self {
        let mut listing = RemoteListing::new();
        for entry in iter {
            listing.insert(entry);
        }
        listing
    }
}

/// Regular files of the local directory, sorted by name
#[derive(Debug, Clone, Default)]
pub struct LocalListing {
    entries: Vec<LocalEntry>,
}

impl LocalListing {
    /// Total size of the listed files in bytes
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<LocalEntry>> for LocalListing {
    fn from(mut entries: Vec<LocalEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.dedup_by(|a, b| a.name == b.name);
        Self { entries }
    }
}

/// Fetch every page of the remote root folder
pub async fn collect_remote(store: &dyn RemoteStore) -> Result<RemoteListing> {
    let mut listing = RemoteListing::new();
    let mut page = store.list_folder("").await?;
    let mut pages = 1usize;

    loop {
        for entry in page.entries.drain(..) {
            listing.insert(entry);
        }
        if !page.has_more {
            break;
        }
        page = store.list_folder_continue(&page.cursor).await?;
        pages += 1;
    }

    tracing::debug!(entries = listing.len(), pages, "Collected remote listing");
    Ok(listing)
}

/// List the regular files directly inside `dir`
pub async fn collect_local(dir: &Path) -> Result<LocalListing> {
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|e| {
        MirrorError::Listing(format!("cannot read {}: {}", dir.display(), e))
    })?;

    let mut entries = Vec::new();
    while let Some(dir_entry) = read_dir.next_entry().await? {
        let name = match dir_entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                return Err(MirrorError::Listing(format!(
                    "file name is not valid UTF-8: {:?}",
                    raw
                )))
            }
        };

        let metadata = tokio::fs::metadata(dir_entry.path()).await.map_err(|e| {
            MirrorError::Listing(format!("cannot stat {}: {}", name, e))
        })?;

        if !metadata.is_file() || is_ignored(&name) {
            continue;
        }

        entries.push(LocalEntry {
            name,
            size: metadata.len(),
        });
    }

    let listing = LocalListing::from(entries);
    tracing::debug!(
        files = listing.len(),
        bytes = listing.total_size(),
        dir = %dir.display(),
        "Collected local listing"
    );
    Ok(listing)
}
