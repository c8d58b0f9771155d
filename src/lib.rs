//! dropmirror - one-way mirror of a local directory into Dropbox
//!
//! Uploads new or changed files, deletes remote files that no longer exist
//! locally, and optionally keeps applying local changes as they happen.

pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod executor;
pub mod hash;
pub mod listing;
pub mod remote;
pub mod sync;
pub mod types;

pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use sync::Mirror;
pub use types::*;
