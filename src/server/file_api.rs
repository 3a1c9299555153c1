//! File API for sandboxed workspace file operations
//!
//! Every request names a workspace directory under the workspaces root and a
//! path inside it. Paths are resolved here once and never escape that root.

use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// File API error types
#[derive(Error, Debug)]
pub enum FileApiError {
    #[error("Access denied")]
    PathEscape,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Io(io::Error),
}

impl From<io::Error> for FileApiError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            FileApiError::NotFound(e.to_string())
        } else {
            FileApiError::Io(e)
        }
    }
}

/// Metadata returned by `/api/stat`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub size: u64,
    pub mtime_ms: f64,
    pub ctime_ms: f64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub mode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Node of the recursive workspace tree
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    /// Workspace-relative, `/` separated
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileEntry>>,
}

/// Root directory of workspace `ws`. `ws` must be one plain path component.
pub fn workspace_root(workspaces_root: &Path, ws: &str) -> Result<PathBuf, FileApiError> {
    let mut components = Path::new(ws).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if !ws.contains(['/', '\\']) => {
            Ok(workspaces_root.join(name))
        }
        _ => {
            warn!(ws = %ws, "Rejected workspace name");
            Err(FileApiError::PathEscape)
        }
    }
}

/// Resolve `relative_path` inside workspace `ws`.
pub fn resolve_sandboxed_path(
    workspaces_root: &Path,
    ws: &str,
    relative_path: &str,
) -> Result<PathBuf, FileApiError> {
    resolve_under(&workspace_root(workspaces_root, ws)?, relative_path)
}

/// Join `relative_path` onto `root` without leaving it.
///
/// The joined path is normalized lexically and must stay under the root
/// (same string, or root followed by a separator). An existing target is
/// also canonicalized so a symlink cannot lead outside the root.
pub fn resolve_under(root: &Path, relative_path: &str) -> Result<PathBuf, FileApiError> {
    let root = normalize(root);
    let target = normalize(&root.join(relative_path.trim_start_matches(['/', '\\'])));

    if !is_within(&root, &target) {
        warn!("Path escape attempt: {:?} not under {:?}", target, root);
        return Err(FileApiError::PathEscape);
    }

    if target.exists() {
        let canonical = target.canonicalize()?;
        let root_canonical = root.canonicalize()?;
        if !is_within(&root_canonical, &canonical) {
            warn!(
                "Symlink escape attempt: {:?} not under {:?}",
                canonical, root_canonical
            );
            return Err(FileApiError::PathEscape);
        }
    }

    Ok(target)
}

/// Lexical normalization: drops `.`, folds `..` into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_within(root: &Path, target: &Path) -> bool {
    let root = root.to_string_lossy();
    let target = target.to_string_lossy();
    if target == root {
        return true;
    }
    match target.strip_prefix(root.as_ref()) {
        Some(rest) => rest.starts_with(std::path::MAIN_SEPARATOR) || root.ends_with('/'),
        None => false,
    }
}

/// Lookups (`stat`, `readdir`, read) report any failure as not found
fn lookup_failed(e: io::Error) -> FileApiError {
    FileApiError::NotFound(e.to_string())
}

pub async fn stat(path: &Path) -> Result<FileStat, FileApiError> {
    let metadata = fs::metadata(path).await.map_err(lookup_failed)?;
    Ok(FileStat {
        size: metadata.len(),
        mtime_ms: millis(metadata.modified().ok()),
        ctime_ms: ctime_millis(&metadata),
        kind: if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        mode: mode_bits(&metadata),
    })
}

fn millis(time: Option<std::time::SystemTime>) -> f64 {
    time.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(unix)]
fn ctime_millis(metadata: &std::fs::Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime() as f64 * 1000.0 + metadata.ctime_nsec() as f64 / 1_000_000.0
}

#[cfg(not(unix))]
fn ctime_millis(metadata: &std::fs::Metadata) -> f64 {
    millis(metadata.created().ok())
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o040755
    } else {
        0o100644
    }
}

/// Shallow listing, names only, sorted
pub async fn read_dir_names(path: &Path) -> Result<Vec<String>, FileApiError> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(path).await.map_err(lookup_failed)?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

/// Recursive tree of everything under `root` (blocking, run off the runtime)
pub fn list_tree(root: &Path) -> io::Result<Vec<FileEntry>> {
    list_tree_at(root, root)
}

fn list_tree_at(root: &Path, dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        let metadata = std::fs::metadata(&path)?;
        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let name = entry.file_name().to_string_lossy().to_string();
        if metadata.is_dir() {
            out.push(FileEntry {
                name,
                path: relative,
                kind: EntryKind::Directory,
                size: None,
                children: Some(list_tree_at(root, &path)?),
            });
        } else {
            out.push(FileEntry {
                name,
                path: relative,
                kind: EntryKind::File,
                size: Some(metadata.len()),
                children: None,
            });
        }
    }
    Ok(out)
}

pub async fn read_text(path: &Path) -> Result<String, FileApiError> {
    debug!("Reading file: {:?}", path);
    let bytes = fs::read(path).await.map_err(lookup_failed)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `content` verbatim, creating parent directories
pub async fn write_bytes(path: &Path, content: &[u8]) -> Result<(), FileApiError> {
    debug!("Writing file: {:?} ({} bytes)", path, content.len());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(FileApiError::Io)?;
    }
    fs::write(path, content).await.map_err(FileApiError::Io)
}

/// Filesystem mutations exposed under `/api/{mkdir,unlink,rmdir}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsMutation {
    Mkdir,
    Unlink,
    Rmdir,
}

impl FsMutation {
    pub fn name(&self) -> &'static str {
        match self {
            FsMutation::Mkdir => "mkdir",
            FsMutation::Unlink => "unlink",
            FsMutation::Rmdir => "rmdir",
        }
    }

    /// Apply the mutation. A target that is already absent counts as success.
    pub async fn apply(&self, path: &Path) -> Result<(), FileApiError> {
        let result = match self {
            FsMutation::Mkdir => fs::create_dir_all(path).await,
            FsMutation::Unlink => fs::remove_file(path).await,
            FsMutation::Rmdir => fs::remove_dir(path).await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(op = self.name(), "Target already absent: {:?}", path);
                Ok(())
            }
            Err(e) => Err(FileApiError::Io(e)),
        }
    }
}
