//! In-process remote store used by tests and dry runs

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ListPage, RemoteStore};
use crate::error::{MirrorError, Result};
use crate::hash::fingerprint_bytes;
use crate::types::RemoteEntry;

/// A call recorded by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    ListFolder(String),
    ListFolderContinue(String),
    Upload(String),
    Delete(String),
}

#[derive(Debug, Clone)]
enum Stored {
    File(Vec<u8>),
    Folder,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Stored>,
    ops: Vec<StoreOp>,
    failing: HashSet<String>,
    fail_continue: bool,
}

/// Flat in-memory object store with paginated listings.
///
/// Keys are stored without the leading slash. Paths registered with
/// [`MemoryStore::fail_on`] reject uploads and deletes.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(500)
    }

    /// Store whose listings return at most `page_size` entries per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: page_size.max(1),
        }
    }

    pub fn insert_file(&self, name: &str, contents: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .objects
            .insert(name.to_string(), Stored::File(contents.into()));
    }

    pub fn insert_folder(&self, name: &str) {
        self.inner
            .lock()
            .objects
            .insert(name.to_string(), Stored::Folder);
    }

    /// Make uploads and deletes of `path` fail
    pub fn fail_on(&self, path: &str) {
        self.inner.lock().failing.insert(path.to_string());
    }

    /// Make every `list_folder_continue` call fail
    pub fn fail_continue(&self) {
        self.inner.lock().fail_continue = true;
    }

    /// Contents of a stored file
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        match self.inner.lock().objects.get(name) {
            Some(Stored::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// All stored names, sorted
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    /// Calls made so far, in order
    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().ops.clone()
    }

    /// Upload and delete calls only
    pub fn mutations(&self) -> Vec<StoreOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, StoreOp::Upload(_) | StoreOp::Delete(_)))
            .collect()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().ops.clear();
    }

    fn page(&self, inner: &Inner, offset: usize) -> ListPage {
        let entries: Vec<RemoteEntry> = inner
            .objects
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|(name, stored)| match stored {
                Stored::File(data) => RemoteEntry::file(name.clone(), fingerprint_bytes(data)),
                Stored::Folder => RemoteEntry::folder(name.clone()),
            })
            .collect();
        let next = offset + entries.len();

        ListPage {
            entries,
            cursor: next.to_string(),
            has_more: next < inner.objects.len(),
        }
    }
}

fn key_for(path: &str) -> Result<String> {
    path.strip_prefix('/')
        .filter(|k| !k.is_empty() && !k.contains('/'))
        .map(str::to_string)
        .ok_or_else(|| MirrorError::RemoteStore(format!("malformed_path: {}", path)))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_folder(&self, path: &str) -> Result<ListPage> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::ListFolder(path.to_string()));
        if !path.is_empty() {
            return Err(MirrorError::RemoteStore(format!(
                "path/not_found: {}",
                path
            )));
        }
        Ok(self.page(&inner, 0))
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        let mut inner = self.inner.lock();
        inner
            .ops
            .push(StoreOp::ListFolderContinue(cursor.to_string()));
        if inner.fail_continue {
            return Err(MirrorError::RemoteStore("reset".to_string()));
        }
        let offset: usize = cursor
            .parse()
            .map_err(|_| MirrorError::RemoteStore(format!("invalid cursor: {}", cursor)))?;
        Ok(self.page(&inner, offset))
    }

    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::Upload(path.to_string()));
        if inner.failing.contains(path) {
            return Err(MirrorError::RemoteStore(format!(
                "path/insufficient_space: {}",
                path
            )));
        }
        let key = key_for(path)?;
        if matches!(inner.objects.get(&key), Some(Stored::Folder)) {
            return Err(MirrorError::RemoteStore(format!(
                "path/conflict/folder: {}",
                path
            )));
        }
        inner.objects.insert(key, Stored::File(contents));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::Delete(path.to_string()));
        if inner.failing.contains(path) {
            return Err(MirrorError::RemoteStore(format!(
                "path_write/disallowed: {}",
                path
            )));
        }
        let key = key_for(path)?;
        match inner.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(MirrorError::RemoteStore(format!(
                "path_lookup/not_found: {}",
                path
            ))),
        }
    }
}
