//! Workspace layer - sandbox mirrors of external folders
//!
//! This module provides:
//! - Workspace metadata records and their persistence
//! - The document tree capability used to reach the external folder
//! - The sync engine (mirror, export, refresh, change detection)

pub mod document_tree;
pub mod prefs;
pub mod state;
pub mod store;
pub mod sync;

pub use document_tree::{DocumentError, DocumentNode, DocumentTree, LocalDocumentTree};
pub use prefs::Preferences;
pub use state::{Workspace, WorkspaceView};
pub use store::{SharedWorkspaceStore, StoreError, WorkspaceStore};
pub use sync::{finish, SyncEngine, SyncError, SyncEvent, SyncOutcome, SyncStream};
