//! Sync engine: external document tree <-> sandbox
//!
//! Flow:
//! 1. Host picks a folder → `mirror_to_sandbox` copies it into a new workspace
//! 2. The editor changes files in the sandbox through the local API
//! 3. Host asks to sync → `export_to_original` writes newer files back
//!
//! Every long-running operation is spawned on its own task and reports
//! through a stream of [`SyncEvent`]s that ends with exactly one terminal
//! event. Dropping the stream does not cancel the operation.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::document_tree::{DocumentError, DocumentNode, DocumentTree};
use super::state::{to_utc, Workspace};
use super::store::{SharedWorkspaceStore, StoreError};

/// Files above this size are left out of a mirror: 50 MiB
pub const MAX_MIRROR_FILE_SIZE: u64 = 50 * 1024 * 1024;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid folder selected")]
    InvalidSource,
    #[error("Original folder no longer accessible")]
    SourceUnavailable,
    #[error("Sandbox directory not found")]
    SandboxMissing,
    #[error("Invalid entry path: {0}")]
    InvalidEntry(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Failed(String),
    #[error("Operation ended without a result")]
    Interrupted,
}

impl SyncError {
    /// Message carried by `SyncEvent::Failed`
    fn report(&self, operation: &str) -> String {
        match self {
            SyncError::InvalidSource | SyncError::SourceUnavailable | SyncError::SandboxMissing => {
                self.to_string()
            }
            other => format!("{} failed: {}", operation, other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Mirrored(Workspace),
    Exported { count: usize, workspace: Workspace },
    Refreshed(Workspace),
}

impl SyncOutcome {
    pub fn workspace(&self) -> &Workspace {
        match self {
            SyncOutcome::Mirrored(w) | SyncOutcome::Refreshed(w) => w,
            SyncOutcome::Exported { workspace, .. } => workspace,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Emitted after each entry; `current` is 1-based
    Progress {
        current: usize,
        total: usize,
        path: String,
    },
    Completed(SyncOutcome),
    Failed(String),
}

impl SyncEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncEvent::Progress { .. })
    }
}

pub type SyncStream = ReceiverStream<SyncEvent>;

/// Drain a sync stream until its terminal event
pub async fn finish<S>(mut stream: S) -> Result<SyncOutcome, SyncError>
where
    S: Stream<Item = SyncEvent> + Unpin,
{
    while let Some(event) = stream.next().await {
        match event {
            SyncEvent::Progress { .. } => continue,
            SyncEvent::Completed(outcome) => return Ok(outcome),
            SyncEvent::Failed(message) => return Err(SyncError::Failed(message)),
        }
    }
    Err(SyncError::Interrupted)
}

/// Sender side of an operation's event stream. A gone receiver is ignored:
/// the operation still runs to completion.
struct Reporter {
    tx: mpsc::Sender<SyncEvent>,
}

impl Reporter {
    async fn progress(&self, current: usize, total: usize, path: &str) {
        let _ = self
            .tx
            .send(SyncEvent::Progress {
                current,
                total,
                path: path.to_string(),
            })
            .await;
    }

    async fn finish(&self, event: SyncEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// A node scheduled for copying, with its sandbox-relative `/` path
struct MirrorEntry {
    node: DocumentNode,
    relative_path: String,
}

/// A sandbox file newer than the last sync
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SyncEngine {
    tree: Arc<dyn DocumentTree>,
    store: SharedWorkspaceStore,
}

impl SyncEngine {
    pub fn new(tree: Arc<dyn DocumentTree>, store: SharedWorkspaceStore) -> Self {
        Self { tree, store }
    }

    pub fn store(&self) -> &SharedWorkspaceStore {
        &self.store
    }

    /// Copy the folder behind `source_ref` into a fresh workspace
    pub fn mirror_to_sandbox(&self, source_ref: &str) -> SyncStream {
        let engine = self.clone();
        let source_ref = source_ref.to_string();
        Self::spawn_operation(move |reporter| async move {
            let event = match engine.run_mirror(&source_ref, &reporter).await {
                Ok(workspace) => SyncEvent::Completed(SyncOutcome::Mirrored(workspace)),
                Err(e) => {
                    error!(source = %source_ref, "Mirror failed: {}", e);
                    SyncEvent::Failed(e.report("Mirror"))
                }
            };
            reporter.finish(event).await;
        })
    }

    /// Write sandbox files modified since the last sync back to the original
    pub fn export_to_original(&self, workspace: &Workspace) -> SyncStream {
        let engine = self.clone();
        let workspace = workspace.clone();
        Self::spawn_operation(move |reporter| async move {
            let event = match engine.run_export(&workspace, &reporter).await {
                Ok((count, workspace)) => {
                    SyncEvent::Completed(SyncOutcome::Exported { count, workspace })
                }
                Err(e) => {
                    error!(workspace = %workspace.id, "Export failed: {}", e);
                    SyncEvent::Failed(e.report("Export"))
                }
            };
            reporter.finish(event).await;
        })
    }

    /// Throw the sandbox away and copy the original again
    pub fn refresh_from_original(&self, workspace: &Workspace) -> SyncStream {
        let engine = self.clone();
        let workspace = workspace.clone();
        Self::spawn_operation(move |reporter| async move {
            let event = match engine.run_refresh(&workspace, &reporter).await {
                Ok(workspace) => SyncEvent::Completed(SyncOutcome::Refreshed(workspace)),
                Err(e) => {
                    error!(workspace = %workspace.id, "Refresh failed: {}", e);
                    SyncEvent::Failed(e.report("Refresh"))
                }
            };
            reporter.finish(event).await;
        })
    }

    /// Poll the sandbox for edits newer than the last sync and move
    /// `last_edited_at` forward to the newest one. Never fails: scan errors
    /// are logged and the workspace comes back unchanged.
    pub async fn check_unsynced_changes(&self, workspace: &Workspace) -> Workspace {
        let sandbox_dir = workspace.sandbox_path.clone();
        if !sandbox_dir.exists() {
            return workspace.clone();
        }

        let since = workspace.last_synced_at;
        let scan =
            tokio::task::spawn_blocking(move || find_changed_files(&sandbox_dir, since)).await;

        let changed = match scan {
            Ok(Ok(changed)) => changed,
            Ok(Err(e)) => {
                error!(workspace = %workspace.id, "Failed to check changes: {}", e);
                return workspace.clone();
            }
            Err(e) => {
                error!(workspace = %workspace.id, "Change scan task failed: {}", e);
                return workspace.clone();
            }
        };

        match changed.iter().map(|f| f.modified).max() {
            Some(latest) if latest > workspace.last_edited_at => {
                let updated = workspace.mark_edited(latest);
                if let Err(e) = self.store.save(&updated) {
                    error!(workspace = %workspace.id, "Failed to persist edit time: {}", e);
                }
                debug!(
                    workspace = %workspace.id,
                    changed = changed.len(),
                    "Unsynced changes detected"
                );
                updated
            }
            _ => workspace.clone(),
        }
    }

    fn spawn_operation<F, Fut>(operation: F) -> SyncStream
    where
        F: FnOnce(Reporter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(operation(Reporter { tx }));
        ReceiverStream::new(rx)
    }

    async fn run_mirror(
        &self,
        source_ref: &str,
        reporter: &Reporter,
    ) -> Result<Workspace, SyncError> {
        let root = self
            .resolve_directory(source_ref)
            .await?
            .ok_or(SyncError::InvalidSource)?;

        let started_at = Utc::now();
        let name = if root.name.is_empty() {
            "Untitled Workspace".to_string()
        } else {
            root.name.clone()
        };
        let id = self.store.generate_id()?;
        let sandbox_dir = self.store.sandbox_dir(&id);

        info!("Mirroring '{}' to {:?}", name, sandbox_dir);

        let entries = self.collect_entries(&root).await?;
        debug!("Found {} entries to copy", entries.len());

        fs::create_dir_all(&sandbox_dir).await?;
        let copied = self
            .copy_entries(&entries, &sandbox_dir, started_at, reporter)
            .await?;

        let workspace = Workspace {
            id,
            name,
            original_location: root.handle.clone(),
            sandbox_path: sandbox_dir,
            file_count: copied,
            created_at: started_at,
            last_synced_at: started_at,
            last_edited_at: started_at,
        };
        self.store.save(&workspace)?;

        info!("Mirror complete: {} entries copied", copied);
        Ok(workspace)
    }

    async fn run_export(
        &self,
        workspace: &Workspace,
        reporter: &Reporter,
    ) -> Result<(usize, Workspace), SyncError> {
        let root = self
            .resolve_directory(&workspace.original_location)
            .await?
            .ok_or(SyncError::SourceUnavailable)?;

        let sandbox_dir = workspace.sandbox_path.clone();
        if !fs::try_exists(&sandbox_dir).await.unwrap_or(false) {
            return Err(SyncError::SandboxMissing);
        }

        let since = workspace.last_synced_at;
        let changed = tokio::task::spawn_blocking(move || find_changed_files(&sandbox_dir, since))
            .await
            .map_err(|e| SyncError::Failed(e.to_string()))??;
        let total = changed.len();

        info!("Exporting {} changed files", total);

        for (index, file) in changed.iter().enumerate() {
            self.copy_file_to_document(&file.path, &root, &file.relative_path)
                .await?;
            reporter.progress(index + 1, total, &file.relative_path).await;
        }

        let updated = workspace.mark_synced(Utc::now());
        self.store.save(&updated)?;

        info!("Export complete: {} files synced", total);
        Ok((total, updated))
    }

    async fn run_refresh(
        &self,
        workspace: &Workspace,
        reporter: &Reporter,
    ) -> Result<Workspace, SyncError> {
        let root = self
            .resolve_directory(&workspace.original_location)
            .await?
            .ok_or(SyncError::SourceUnavailable)?;

        let refreshed_at = Utc::now();
        let sandbox_dir = workspace.sandbox_path.clone();

        // 全量刷新：旧沙箱内容直接丢弃
        if fs::try_exists(&sandbox_dir).await.unwrap_or(false) {
            fs::remove_dir_all(&sandbox_dir).await?;
        }
        fs::create_dir_all(&sandbox_dir).await?;

        let entries = self.collect_entries(&root).await?;
        let copied = self
            .copy_entries(&entries, &sandbox_dir, refreshed_at, reporter)
            .await?;

        let updated = Workspace {
            file_count: copied,
            last_synced_at: refreshed_at,
            ..workspace.clone()
        };
        self.store.save(&updated)?;

        info!(workspace = %workspace.id, "Refresh complete: {} entries copied", copied);
        Ok(updated)
    }

    /// The directory behind `reference`, or `None` if it is gone, is not a
    /// directory or the reference cannot be parsed
    async fn resolve_directory(&self, reference: &str) -> Result<Option<DocumentNode>, SyncError> {
        match self.tree.resolve(reference).await {
            Ok(node) => Ok(node.filter(|n| n.is_directory)),
            Err(DocumentError::InvalidReference(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Depth-first, children sorted by name, each directory listed before
    /// its contents. Oversized files are dropped here.
    async fn collect_entries(&self, root: &DocumentNode) -> Result<Vec<MirrorEntry>, SyncError> {
        let mut result = Vec::new();
        let mut stack: Vec<MirrorEntry> = Vec::new();
        push_children(&mut stack, self.tree.list_children(root).await?, "");

        while let Some(entry) = stack.pop() {
            if entry.node.is_directory {
                let children = self.tree.list_children(&entry.node).await?;
                let base = entry.relative_path.clone();
                result.push(entry);
                push_children(&mut stack, children, &base);
            } else if entry.node.length > MAX_MIRROR_FILE_SIZE {
                warn!(
                    "Skipping large file: {} ({} bytes)",
                    entry.relative_path, entry.node.length
                );
            } else {
                result.push(entry);
            }
        }

        Ok(result)
    }

    async fn copy_entries(
        &self,
        entries: &[MirrorEntry],
        sandbox_dir: &Path,
        stamp: DateTime<Utc>,
        reporter: &Reporter,
    ) -> Result<usize, SyncError> {
        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            let target = sandbox_target(sandbox_dir, &entry.relative_path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }

            if entry.node.is_directory {
                fs::create_dir_all(&target).await?;
            } else {
                self.copy_document_to_file(&entry.node, &target, stamp)
                    .await?;
            }

            reporter.progress(index + 1, total, &entry.relative_path).await;
        }
        Ok(total)
    }

    /// Stream one document into the sandbox; the copy's mtime is set to
    /// `stamp` so an unedited copy never counts as newer than the sync.
    async fn copy_document_to_file(
        &self,
        source: &DocumentNode,
        target: &Path,
        stamp: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let mut reader = self.tree.open_read(source).await?;
        let mut output = fs::File::create(target).await?;
        tokio::io::copy(&mut reader, &mut output).await?;
        output.flush().await?;

        let output = output.into_std().await;
        output.set_modified(SystemTime::from(stamp))?;
        Ok(())
    }

    /// Walk/create the directory chain under `root`, then create or
    /// overwrite the leaf document with the sandbox file's bytes.
    async fn copy_file_to_document(
        &self,
        source: &Path,
        root: &DocumentNode,
        relative_path: &str,
    ) -> Result<(), SyncError> {
        let parts: Vec<&str> = relative_path.split('/').collect();
        let (file_name, dirs) = parts
            .split_last()
            .ok_or_else(|| SyncError::InvalidEntry(relative_path.to_string()))?;

        let mut current = root.clone();
        for dir_name in dirs {
            current = match self.tree.find_child(&current, dir_name).await? {
                Some(existing) if existing.is_directory => existing,
                _ => self.tree.create_directory(&current, dir_name).await?,
            };
        }

        let target = match self.tree.find_child(&current, file_name).await? {
            Some(existing) => existing,
            None => {
                self.tree
                    .create_file(&current, &mime_hint(file_name), file_name)
                    .await?
            }
        };

        let mut writer = self.tree.open_write(&target, true).await?;
        let mut input = fs::File::open(source).await?;
        tokio::io::copy(&mut input, &mut writer).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

fn push_children(stack: &mut Vec<MirrorEntry>, mut children: Vec<DocumentNode>, base: &str) {
    children.sort_by(|a, b| a.name.cmp(&b.name));
    // 逆序入栈，保证按名称顺序出栈
    for node in children.into_iter().rev() {
        if node.name.is_empty() || node.name == "." || node.name == ".." {
            continue;
        }
        let relative_path = if base.is_empty() {
            node.name.clone()
        } else {
            format!("{}/{}", base, node.name)
        };
        stack.push(MirrorEntry {
            node,
            relative_path,
        });
    }
}

/// Sandbox path for a `/`-separated relative path; separators inside a
/// name would escape the sandbox and are refused.
fn sandbox_target(sandbox_dir: &Path, relative_path: &str) -> Result<PathBuf, SyncError> {
    let mut target = sandbox_dir.to_path_buf();
    for part in relative_path.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return Err(SyncError::InvalidEntry(relative_path.to_string()));
        }
        target.push(part);
    }
    Ok(target)
}

fn mime_hint(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Regular files under `dir` modified strictly after `since`, in sorted
/// walk order
pub fn find_changed_files(
    dir: &Path,
    since: DateTime<Utc>,
) -> Result<Vec<ChangedFile>, SyncError> {
    let mut result = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = to_utc(entry.metadata()?.modified()?);
        if modified <= since {
            continue;
        }
        let relative_path = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| SyncError::InvalidEntry(entry.path().display().to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        result.push(ChangedFile {
            path: entry.path().to_path_buf(),
            relative_path,
            modified,
        });
    }
    Ok(result)
}
