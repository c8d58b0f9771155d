//! Core types for dropmirror

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name that never takes part in mirroring (Finder metadata)
pub const IGNORED_NAME: &str = ".DS_Store";

/// Check whether a file name is excluded from mirroring
pub fn is_ignored(name: &str) -> bool {
    name == IGNORED_NAME
}

/// Remote path for a file name in the flat mirrored folder
pub fn remote_path(name: &str) -> String {
    format!("/{}", name)
}

/// An object in the remote folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File name (no leading slash)
    pub name: String,
    /// Content hash reported by the remote store (files only)
    pub content_hash: Option<String>,
    /// Whether the entry is a file rather than a folder
    pub is_file: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_hash: Some(content_hash.into()),
            is_file: true,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_hash: None,
            is_file: false,
        }
    }
}

/// A regular file in the local directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// File name relative to the mirrored directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// What to do with a single name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Local file missing remotely
    Create,
    /// Local file whose content differs from the remote copy
    Update,
    /// Remote object with no local counterpart
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        }
    }

    /// Creates and updates both upload the file
    pub fn is_upload(&self) -> bool {
        matches!(self, ActionKind::Create | ActionKind::Update)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single upload or delete against the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub name: String,
}

impl Action {
    pub fn new(kind: ActionKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn create(name: impl Into<String>) -> Self {
        Self::new(ActionKind::Create, name)
    }

    pub fn update(name: impl Into<String>) -> Self {
        Self::new(ActionKind::Update, name)
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(ActionKind::Delete, name)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str().to_uppercase(), self.name)
    }
}

/// Ordered actions computed by one reconciliation pass.
///
/// Uploads (creates and updates) always precede deletes, and a name appears in
/// at most one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    actions: Vec<Action>,
}

impl ReconciliationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// All actions in execution order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Creates and updates, in local listing order
    pub fn uploads(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.kind.is_upload())
    }

    /// Deletes, in remote listing order
    pub fn deletes(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Delete)
    }

    /// Number of actions of the given kind
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Look up the action planned for a name
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Result of applying one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    /// Error message when the action failed
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary status of a full pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Finished,
    FinishedWithErrors,
}

impl std::fmt::Display for PassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassStatus::Finished => write!(f, "Full sync finished"),
            PassStatus::FinishedWithErrors => write!(f, "Full sync finished with errors"),
        }
    }
}

/// Report for one full reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    /// Identifier used to correlate log lines
    pub pass_id: Uuid,
    pub plan: ReconciliationPlan,
    /// One outcome per executed action, uploads first
    pub outcomes: Vec<ActionOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PassReport {
    pub fn has_errors(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_success())
    }

    /// Outcomes of the actions that failed
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn status(&self) -> PassStatus {
        if self.has_errors() {
            PassStatus::FinishedWithErrors
        } else {
            PassStatus::Finished
        }
    }
}

/// Kind of a live file-system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// File appeared or its content changed
    Modified,
    /// File disappeared
    Removed,
}

/// A single file-system notification for the mirrored directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub name: String,
}

impl ChangeEvent {
    pub fn modified(name: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Modified,
            name: name.into(),
        }
    }

    pub fn removed(name: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            name: name.into(),
        }
    }

    /// The single action this event maps to
    pub fn to_action(&self) -> Action {
        match self.kind {
            ChangeKind::Modified => Action::update(&self.name),
            ChangeKind::Removed => Action::delete(&self.name),
        }
    }
}

/// A live event that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    pub event: ChangeEvent,
    pub error: String,
}
