//! Workspace metadata record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// A folder mirrored into the sandbox.
///
/// `original_location` is whatever opaque reference the document tree handed
/// out for the source folder; it is never interpreted as a local path here.
/// The directory at `sandbox_path` belongs to this record alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub original_location: String,
    pub sandbox_path: PathBuf,
    #[serde(default)]
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub last_edited_at: DateTime<Utc>,
}

impl Workspace {
    /// Edited in the sandbox after the last sync with the original
    pub fn has_unsynced_changes(&self) -> bool {
        self.last_edited_at > self.last_synced_at
    }

    /// Copy with `last_synced_at` moved to `at`
    pub fn mark_synced(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_synced_at: at,
            ..self.clone()
        }
    }

    /// Copy with `last_edited_at` moved to `at`
    pub fn mark_edited(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_edited_at: at,
            ..self.clone()
        }
    }
}

/// Serialized form handed to the front-end, with the derived dirty flag
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView<'a> {
    #[serde(flatten)]
    pub workspace: &'a Workspace,
    pub has_unsynced_changes: bool,
}

impl<'a> From<&'a Workspace> for WorkspaceView<'a> {
    fn from(workspace: &'a Workspace) -> Self {
        Self {
            has_unsynced_changes: workspace.has_unsynced_changes(),
            workspace,
        }
    }
}

pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}
