//! Remote store abstraction
//!
//! The reconciliation engine only needs four operations from the remote:
//! list a folder, continue a listing, overwrite-upload a file and delete a
//! file. Paths are always `/<name>` in a flat namespace.

#[cfg(feature = "dropbox")]
mod dropbox;
mod memory;

#[cfg(feature = "dropbox")]
pub use dropbox::DropboxClient;
pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RemoteEntry;

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Cursor to pass to `list_folder_continue`
    pub cursor: String,
    pub has_more: bool,
}

/// Operations the mirror needs from a remote object store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// First page of the listing for `path` (`""` is the root)
    async fn list_folder(&self, path: &str) -> Result<ListPage>;

    /// Next page of a listing started with `list_folder`
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage>;

    /// Upload `contents` to `path`, overwriting any existing object
    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<()>;

    /// Delete the object at `path`
    async fn delete(&self, path: &str) -> Result<()>;
}
