//! Mirror configuration
//!
//! Loaded from a TOML file (or the legacy JSON secret file) and then
//! overridden by command-line flags and environment variables.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

/// Configuration for one mirrored directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Dropbox access token
    #[serde(default, alias = "DROPBOX_KEY")]
    pub access_token: String,
    /// Local directory to mirror (always ends with a path separator once normalized)
    #[serde(default, alias = "SYNC_FULL_PATH")]
    pub local_dir: String,
    /// Actions run at once within a phase (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound for fingerprinting a single file
    #[serde(default = "default_fingerprint_timeout_secs")]
    pub fingerprint_timeout_secs: u64,
    /// Optional timeout for each HTTP request to the remote store
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_content_url")]
    pub content_url: String,
}

fn default_concurrency() -> usize {
    1
}

fn default_fingerprint_timeout_secs() -> u64 {
    300
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_content_url() -> String {
    DEFAULT_CONTENT_URL.to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            local_dir: String::new(),
            concurrency: default_concurrency(),
            fingerprint_timeout_secs: default_fingerprint_timeout_secs(),
            request_timeout_secs: None,
            api_url: default_api_url(),
            content_url: default_content_url(),
        }
    }
}

impl MirrorConfig {
    pub fn new(access_token: impl Into<String>, local_dir: &str) -> Self {
        Self {
            access_token: access_token.into(),
            local_dir: normalize_local_dir(local_dir),
            ..Default::default()
        }
    }

    /// Load from a file; `.json` files use the legacy secret layout, anything else is TOML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MirrorConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        if !config.local_dir.is_empty() {
            config.local_dir = normalize_local_dir(&config.local_dir);
        }
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Reject configurations the mirror cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(MirrorError::Config("access token is required".to_string()));
        }
        if self.local_dir.trim().is_empty() {
            return Err(MirrorError::Config("local directory is required".to_string()));
        }
        if self.concurrency == 0 {
            return Err(MirrorError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.fingerprint_timeout_secs == 0 {
            return Err(MirrorError::Config(
                "fingerprint timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.local_dir)
    }

    pub fn fingerprint_timeout(&self) -> Duration {
        Duration::from_secs(self.fingerprint_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Expand `~` and make sure the path ends with a separator
pub fn normalize_local_dir(dir: &str) -> String {
    let mut expanded = shellexpand::tilde(dir).to_string();
    if !expanded.ends_with(MAIN_SEPARATOR) && !expanded.ends_with('/') {
        expanded.push(MAIN_SEPARATOR);
    }
    expanded
}

/// `<config dir>/dropmirror/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dropmirror").join("config.toml"))
}
