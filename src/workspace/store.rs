//! Workspace metadata persistence
//!
//! All records live as one JSON array under a single preferences slot.
//! Every mutation reads the whole list, changes it in memory and writes the
//! whole list back.

use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::prefs::Preferences;
use super::state::Workspace;
use crate::config::ServerConfig;

const PREFS_NAME: &str = "pocket_workspaces";
const KEY_WORKSPACES: &str = "workspaces_json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

pub struct WorkspaceStore {
    prefs: Preferences,
    sandbox_root: PathBuf,
    lock: Mutex<()>,
    /// ids handed out by this process, saved or not
    issued: Mutex<HashSet<String>>,
}

pub type SharedWorkspaceStore = Arc<WorkspaceStore>;

impl WorkspaceStore {
    /// Open the store; the sandbox root is created if missing
    pub fn open(prefs_dir: &Path, sandbox_root: PathBuf) -> Result<Self, StoreError> {
        let prefs = Preferences::open(prefs_dir, PREFS_NAME)?;
        fs::create_dir_all(&sandbox_root)?;
        Ok(Self {
            prefs,
            sandbox_root,
            lock: Mutex::new(()),
            issued: Mutex::new(HashSet::new()),
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, StoreError> {
        Self::open(&config.prefs_dir(), config.workspaces_root())
    }

    /// All saved workspaces. A corrupt collection reads as empty.
    pub fn all(&self) -> Result<Vec<Workspace>, StoreError> {
        let json = match self.prefs.get_string(KEY_WORKSPACES)? {
            Some(json) => json,
            None => return Ok(Vec::new()),
        };
        match serde_json::from_str(&json) {
            Ok(list) => Ok(list),
            Err(e) => {
                error!("Error parsing workspaces: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<Workspace>, StoreError> {
        Ok(self.all()?.into_iter().find(|w| w.id == id))
    }

    pub fn get_by_original(&self, location: &str) -> Result<Option<Workspace>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .find(|w| w.original_location == location))
    }

    /// Replace the record with the same id, or append it
    pub fn save(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut workspaces = self.all()?;
        match workspaces.iter_mut().find(|w| w.id == workspace.id) {
            Some(existing) => *existing = workspace.clone(),
            None => workspaces.push(workspace.clone()),
        }
        self.save_all(&workspaces)?;
        debug!("Saved workspace: {} ({})", workspace.name, workspace.id);
        Ok(())
    }

    /// Remove the record only; sandbox files stay on disk
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let workspaces: Vec<Workspace> =
            self.all()?.into_iter().filter(|w| w.id != id).collect();
        self.save_all(&workspaces)?;
        debug!("Deleted workspace: {}", id);
        Ok(())
    }

    /// Remove the record and its sandbox directory. Returns false for an
    /// unknown id. The original location is never touched.
    pub fn delete_with_files(&self, id: &str) -> Result<bool, StoreError> {
        let workspace = match self.get(id)? {
            Some(w) => w,
            None => return Ok(false),
        };

        if workspace.sandbox_path.exists() {
            fs::remove_dir_all(&workspace.sandbox_path)?;
        }

        self.delete(id)?;
        info!("Deleted workspace with files: {}", workspace.name);
        Ok(true)
    }

    /// `ws_<unix millis>_<4 hex>`; retried until it collides with no id
    /// issued earlier, no saved record and no existing sandbox directory.
    pub fn generate_id(&self) -> Result<String, StoreError> {
        let existing = self.all()?;
        let mut issued = self.issued.lock().map_err(|_| StoreError::Poisoned)?;
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let id = format!("ws_{}_{}", Utc::now().timestamp_millis(), &suffix[..4]);
            if !issued.contains(&id)
                && existing.iter().all(|w| w.id != id)
                && !self.sandbox_dir(&id).exists()
            {
                issued.insert(id.clone());
                return Ok(id);
            }
        }
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    pub fn sandbox_dir(&self, id: &str) -> PathBuf {
        self.sandbox_root.join(id)
    }

    fn save_all(&self, workspaces: &[Workspace]) -> Result<(), StoreError> {
        let json = serde_json::to_string(workspaces)?;
        self.prefs.put_string(KEY_WORKSPACES, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> WorkspaceStore {
        WorkspaceStore::open(&temp.path().join("prefs"), temp.path().join("workspaces")).unwrap()
    }

    fn record(store: &WorkspaceStore, id: &str, location: &str) -> Workspace {
        let now = Utc::now();
        Workspace {
            id: id.to_string(),
            name: id.to_uppercase(),
            original_location: location.to_string(),
            sandbox_path: store.sandbox_dir(id),
            file_count: 0,
            created_at: now,
            last_synced_at: now,
            last_edited_at: now,
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        assert!(store.sandbox_root().is_dir());
        assert!(store.all().unwrap().is_empty());

        let a = record(&store, "a", "file:///src/a");
        let b = record(&store, "b", "file:///src/b");
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let mut renamed = a.clone();
        renamed.name = "renamed".to_string();
        store.save(&renamed).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "renamed");
        assert_eq!(store.get("b").unwrap(), Some(b.clone()));
        assert_eq!(store.get_by_original("file:///src/b").unwrap(), Some(b));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_delete_keeps_files() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let a = record(&store, "a", "file:///src/a");
        fs::create_dir_all(&a.sandbox_path).unwrap();
        store.save(&a).unwrap();

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert!(a.sandbox_path.exists());
    }

    #[test]
    fn test_delete_with_files() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let a = record(&store, "a", "file:///src/a");
        fs::create_dir_all(a.sandbox_path.join("nested")).unwrap();
        fs::write(a.sandbox_path.join("nested/file.txt"), "x").unwrap();
        store.save(&a).unwrap();

        assert!(store.delete_with_files("a").unwrap());
        assert!(!a.sandbox_path.exists());
        assert!(store.get("a").unwrap().is_none());
        assert!(!store.delete_with_files("a").unwrap());
    }

    #[test]
    fn test_corrupt_collection_reads_empty() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.prefs.put_string(KEY_WORKSPACES, "not json").unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let ids: HashSet<String> = (0..200).map(|_| store.generate_id().unwrap()).collect();
        assert_eq!(ids.len(), 200);
        assert!(ids.iter().all(|id| id.starts_with("ws_")));
    }
}
