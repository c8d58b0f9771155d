//! Error types for dropmirror

use thiserror::Error;

/// Result type alias for dropmirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for dropmirror
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "dropbox")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Remote store error: {0}")]
    RemoteStore(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "watcher")]
impl From<notify::Error> for MirrorError {
    fn from(e: notify::Error) -> Self {
        MirrorError::Watch(e.to_string())
    }
}
