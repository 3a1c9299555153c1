//! Sync engine integration tests against a local document tree

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

use pocket_core::workspace::{
    finish, LocalDocumentTree, SyncEngine, SyncError, SyncEvent, SyncOutcome, Workspace,
    WorkspaceStore,
};

struct Fixture {
    source: TempDir,
    data: TempDir,
    engine: SyncEngine,
}

impl Fixture {
    fn new() -> Self {
        let source = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let store = WorkspaceStore::open(
            &data.path().join("prefs"),
            data.path().join("workspaces"),
        )
        .unwrap();
        let engine = SyncEngine::new(Arc::new(LocalDocumentTree::new()), Arc::new(store));
        Self {
            source,
            data,
            engine,
        }
    }

    fn reference(&self) -> String {
        LocalDocumentTree::reference_for(self.source.path()).unwrap()
    }

    fn write_source(&self, relative: &str, content: &str) {
        let path = self.source.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn mirror(&self) -> Workspace {
        match finish(self.engine.mirror_to_sandbox(&self.reference()))
            .await
            .unwrap()
        {
            SyncOutcome::Mirrored(workspace) => workspace,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}

fn set_mtime(path: &Path, at: DateTime<Utc>) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(at)).unwrap();
}

#[tokio::test]
async fn test_mirror_copies_tree_and_counts_entries() {
    let fx = Fixture::new();
    fx.write_source("README.md", "# readme");
    fx.write_source("src/main.rs", "fn main() {}");
    fx.write_source("src/util/mod.rs", "");

    let mut stream = fx.engine.mirror_to_sandbox(&fx.reference());
    let mut progress = Vec::new();
    let mut outcome = None;
    while let Some(event) = stream.next().await {
        match event {
            SyncEvent::Progress {
                current,
                total,
                path,
            } => progress.push((current, total, path)),
            SyncEvent::Completed(o) => outcome = Some(o),
            SyncEvent::Failed(msg) => panic!("mirror failed: {}", msg),
        }
    }

    let workspace = match outcome {
        Some(SyncOutcome::Mirrored(w)) => w,
        other => panic!("unexpected outcome: {:?}", other),
    };

    // 3 files + 2 directories, directories before their contents
    assert_eq!(workspace.file_count, 5);
    let paths: Vec<&str> = progress.iter().map(|(_, _, p)| p.as_str()).collect();
    assert_eq!(
        paths,
        vec!["README.md", "src", "src/main.rs", "src/util", "src/util/mod.rs"]
    );
    assert_eq!(progress.last().map(|(c, t, _)| (*c, *t)), Some((5, 5)));

    assert_eq!(workspace.created_at, workspace.last_synced_at);
    assert_eq!(workspace.last_synced_at, workspace.last_edited_at);
    assert!(!workspace.has_unsynced_changes());
    assert!(workspace.id.starts_with("ws_"));
    assert_eq!(workspace.original_location, fx.reference());
    assert_eq!(
        workspace.name,
        fx.source.path().file_name().unwrap().to_string_lossy()
    );

    assert_eq!(
        std::fs::read_to_string(workspace.sandbox_path.join("src/main.rs")).unwrap(),
        "fn main() {}"
    );
    assert!(workspace.sandbox_path.starts_with(fx.data.path().join("workspaces")));

    let stored = fx.engine.store().get(&workspace.id).unwrap().unwrap();
    assert_eq!(stored, workspace);
}

#[tokio::test]
async fn test_mirror_skips_files_over_50_mib() {
    let fx = Fixture::new();
    fx.write_source("small.txt", "small");
    let big = std::fs::File::create(fx.source.path().join("huge.bin")).unwrap();
    big.set_len(51 * 1024 * 1024).unwrap();

    let workspace = fx.mirror().await;
    assert_eq!(workspace.file_count, 1);
    assert!(workspace.sandbox_path.join("small.txt").exists());
    assert!(!workspace.sandbox_path.join("huge.bin").exists());
}

#[tokio::test]
async fn test_export_right_after_mirror_exports_nothing() {
    let fx = Fixture::new();
    fx.write_source("a.txt", "a");
    fx.write_source("dir/b.txt", "b");
    let workspace = fx.mirror().await;

    match finish(fx.engine.export_to_original(&workspace)).await.unwrap() {
        SyncOutcome::Exported { count, .. } => assert_eq!(count, 0),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_check_then_export_edits() {
    let fx = Fixture::new();
    fx.write_source("notes/today.md", "original");
    let workspace = fx.mirror().await;

    // Edit in the sandbox with a known mtime T after the sync
    let edited = workspace.sandbox_path.join("notes/today.md");
    std::fs::write(&edited, "edited in sandbox").unwrap();
    let t = DateTime::from_timestamp(workspace.last_synced_at.timestamp() + 10, 0).unwrap();
    set_mtime(&edited, t);
    std::fs::create_dir_all(workspace.sandbox_path.join("new/dir")).unwrap();
    let added = workspace.sandbox_path.join("new/dir/file.txt");
    std::fs::write(&added, "brand new").unwrap();
    set_mtime(&added, t - Duration::seconds(5));

    let checked = fx.engine.check_unsynced_changes(&workspace).await;
    assert_eq!(checked.last_edited_at, t);
    assert!(checked.has_unsynced_changes());
    assert_eq!(fx.engine.store().get(&workspace.id).unwrap().unwrap(), checked);

    // Checking again changes nothing
    let again = fx.engine.check_unsynced_changes(&checked).await;
    assert_eq!(again.last_edited_at, t);

    let (count, exported) = match finish(fx.engine.export_to_original(&checked))
        .await
        .unwrap()
    {
        SyncOutcome::Exported { count, workspace } => (count, workspace),
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(count, 2);
    assert!(exported.last_synced_at > checked.last_synced_at);
    assert_eq!(
        std::fs::read_to_string(fx.source.path().join("notes/today.md")).unwrap(),
        "edited in sandbox"
    );
    assert_eq!(
        std::fs::read_to_string(fx.source.path().join("new/dir/file.txt")).unwrap(),
        "brand new"
    );
}

#[tokio::test]
async fn test_refresh_replaces_sandbox() {
    let fx = Fixture::new();
    fx.write_source("keep.txt", "v1");
    let workspace = fx.mirror().await;
    std::fs::write(workspace.sandbox_path.join("scratch.txt"), "local only").unwrap();

    fx.write_source("keep.txt", "v2");
    fx.write_source("added/new.txt", "new");

    let refreshed = match finish(fx.engine.refresh_from_original(&workspace))
        .await
        .unwrap()
    {
        SyncOutcome::Refreshed(w) => w,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(refreshed.id, workspace.id);
    assert_eq!(refreshed.file_count, 3);
    assert!(refreshed.last_synced_at >= workspace.last_synced_at);
    assert_eq!(refreshed.created_at, workspace.created_at);
    assert!(!refreshed.sandbox_path.join("scratch.txt").exists());
    assert_eq!(
        std::fs::read_to_string(refreshed.sandbox_path.join("keep.txt")).unwrap(),
        "v2"
    );
}

#[tokio::test]
async fn test_failure_messages() {
    let fx = Fixture::new();

    let missing = format!("{}/nope", fx.reference());
    match finish(fx.engine.mirror_to_sandbox(&missing)).await {
        Err(SyncError::Failed(msg)) => assert_eq!(msg, "Invalid folder selected"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    match finish(fx.engine.mirror_to_sandbox("not a reference")).await {
        Err(SyncError::Failed(msg)) => assert_eq!(msg, "Invalid folder selected"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    fx.write_source("a.txt", "a");
    let workspace = fx.mirror().await;

    let mut gone = workspace.clone();
    gone.original_location = missing.clone();
    for stream in [
        fx.engine.export_to_original(&gone),
        fx.engine.refresh_from_original(&gone),
    ] {
        match finish(stream).await {
            Err(SyncError::Failed(msg)) => assert_eq!(msg, "Original folder no longer accessible"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    std::fs::remove_dir_all(&workspace.sandbox_path).unwrap();
    match finish(fx.engine.export_to_original(&workspace)).await {
        Err(SyncError::Failed(msg)) => assert_eq!(msg, "Sandbox directory not found"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_delete_with_files_leaves_source_untouched() {
    let fx = Fixture::new();
    fx.write_source("keep/me.txt", "precious");
    let workspace = fx.mirror().await;
    assert!(workspace.sandbox_path.exists());

    assert!(fx.engine.store().delete_with_files(&workspace.id).unwrap());
    assert!(!workspace.sandbox_path.exists());
    assert!(fx.engine.store().get(&workspace.id).unwrap().is_none());
    assert_eq!(
        std::fs::read_to_string(fx.source.path().join("keep/me.txt")).unwrap(),
        "precious"
    );
}
