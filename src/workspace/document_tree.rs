//! Document tree capability
//!
//! The external folder is only reachable through this trait: the sync
//! engine never builds filesystem paths into it. `LocalDocumentTree` is the
//! implementation used by the CLI and tests; nodes are addressed by
//! `file://` URIs.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Invalid document reference: {0}")]
    InvalidReference(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Document I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One node of the external tree as seen by its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNode {
    /// Opaque handle, only meaningful to the tree that issued it
    pub handle: String,
    pub name: String,
    pub is_directory: bool,
    pub length: u64,
}

pub type DocumentReader = Box<dyn AsyncRead + Send + Unpin>;
pub type DocumentWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait DocumentTree: Send + Sync {
    /// Resolve a stored reference; `None` if it no longer points anywhere
    async fn resolve(&self, reference: &str) -> Result<Option<DocumentNode>, DocumentError>;

    async fn list_children(&self, node: &DocumentNode) -> Result<Vec<DocumentNode>, DocumentError>;

    async fn open_read(&self, node: &DocumentNode) -> Result<DocumentReader, DocumentError>;

    async fn create_directory(
        &self,
        parent: &DocumentNode,
        name: &str,
    ) -> Result<DocumentNode, DocumentError>;

    async fn create_file(
        &self,
        parent: &DocumentNode,
        mime_hint: &str,
        name: &str,
    ) -> Result<DocumentNode, DocumentError>;

    async fn find_child(
        &self,
        parent: &DocumentNode,
        name: &str,
    ) -> Result<Option<DocumentNode>, DocumentError> {
        Ok(self
            .list_children(parent)
            .await?
            .into_iter()
            .find(|child| child.name == name))
    }

    async fn open_write(
        &self,
        node: &DocumentNode,
        truncate: bool,
    ) -> Result<DocumentWriter, DocumentError>;
}

/// Document tree over the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalDocumentTree;

impl LocalDocumentTree {
    pub fn new() -> Self {
        Self
    }

    /// Reference for a local directory, as stored in `original_location`
    pub fn reference_for(path: &Path) -> Result<String, DocumentError> {
        let absolute = std::fs::canonicalize(path)?;
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| DocumentError::InvalidReference(path.display().to_string()))
    }

    fn path_of(reference: &str) -> Result<PathBuf, DocumentError> {
        if reference.starts_with("file:") {
            Url::parse(reference)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| DocumentError::InvalidReference(reference.to_string()))
        } else {
            let path = PathBuf::from(reference);
            if path.is_absolute() {
                Ok(path)
            } else {
                Err(DocumentError::InvalidReference(reference.to_string()))
            }
        }
    }

    async fn node_at(path: &Path) -> Result<DocumentNode, DocumentError> {
        let metadata = fs::metadata(path).await?;
        let handle = Url::from_file_path(path)
            .map_err(|_| DocumentError::InvalidReference(path.display().to_string()))?
            .to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(DocumentNode {
            handle,
            name,
            is_directory: metadata.is_dir(),
            length: if metadata.is_dir() { 0 } else { metadata.len() },
        })
    }

    fn child_path(parent: &DocumentNode, name: &str) -> Result<PathBuf, DocumentError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(DocumentError::InvalidReference(name.to_string()));
        }
        Ok(Self::path_of(&parent.handle)?.join(name))
    }
}

#[async_trait]
impl DocumentTree for LocalDocumentTree {
    async fn resolve(&self, reference: &str) -> Result<Option<DocumentNode>, DocumentError> {
        let path = Self::path_of(reference)?;
        match Self::node_at(&path).await {
            Ok(node) => Ok(Some(node)),
            Err(DocumentError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_children(&self, node: &DocumentNode) -> Result<Vec<DocumentNode>, DocumentError> {
        let dir = Self::path_of(&node.handle)?;
        let mut children = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            children.push(Self::node_at(&entry.path()).await?);
        }
        Ok(children)
    }

    async fn open_read(&self, node: &DocumentNode) -> Result<DocumentReader, DocumentError> {
        let file = fs::File::open(Self::path_of(&node.handle)?).await?;
        Ok(Box::new(file))
    }

    async fn create_directory(
        &self,
        parent: &DocumentNode,
        name: &str,
    ) -> Result<DocumentNode, DocumentError> {
        let path = Self::child_path(parent, name)?;
        fs::create_dir(&path).await?;
        Self::node_at(&path).await
    }

    async fn create_file(
        &self,
        parent: &DocumentNode,
        mime_hint: &str,
        name: &str,
    ) -> Result<DocumentNode, DocumentError> {
        let path = Self::child_path(parent, name)?;
        debug!(path = ?path, mime = mime_hint, "Creating document");
        fs::File::create(&path).await?;
        Self::node_at(&path).await
    }

    async fn find_child(
        &self,
        parent: &DocumentNode,
        name: &str,
    ) -> Result<Option<DocumentNode>, DocumentError> {
        let path = Self::child_path(parent, name)?;
        match Self::node_at(&path).await {
            Ok(node) => Ok(Some(node)),
            Err(DocumentError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_write(
        &self,
        node: &DocumentNode,
        truncate: bool,
    ) -> Result<DocumentWriter, DocumentError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .truncate(truncate)
            .open(Self::path_of(&node.handle)?)
            .await?;
        Ok(Box::new(file))
    }
}
