//! Plain substring search across a workspace
//!
//! Walks the workspace in sorted depth-first order, pruning build output and
//! VCS metadata, and stops as soon as `MAX_SEARCH_RESULTS` lines matched.

use serde::Serialize;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Maximum number of matches returned for one query
pub const MAX_SEARCH_RESULTS: usize = 200;

/// Files of this size or larger are not scanned
pub const MAX_SEARCH_FILE_SIZE: u64 = 500_000;

/// Preview text is cut to this many characters
pub const PREVIEW_CHARS: usize = 80;

/// Names pruned from the walk, files and directories alike
pub const SEARCH_SKIP_NAMES: &[&str] = &[".git", "node_modules", "dist", "build", ".DS_Store"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    /// Workspace-relative, `/` separated
    pub file: String,
    /// 1-based
    pub line: usize,
    pub text: String,
}

/// Search every file under `root` for lines containing `query`.
/// A missing root or an empty query yields no matches.
pub fn search_workspace(root: &Path, query: &str) -> Vec<SearchMatch> {
    let mut results = Vec::new();
    if query.is_empty() || !root.is_dir() {
        return results;
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !should_skip(&e.file_name().to_string_lossy()));

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if size >= MAX_SEARCH_FILE_SIZE {
            continue;
        }
        let content = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to read {:?}: {}", entry.path(), e);
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let text = String::from_utf8_lossy(&content);
        for (index, line) in text.split('\n').enumerate() {
            if !line.contains(query) {
                continue;
            }
            results.push(SearchMatch {
                file: relative.clone(),
                line: index + 1,
                text: line.trim().chars().take(PREVIEW_CHARS).collect(),
            });
            if results.len() >= MAX_SEARCH_RESULTS {
                return results;
            }
        }
    }

    debug!(
        "Search {:?} in {:?}: {} matches",
        query,
        root,
        results.len()
    );
    results
}

fn should_skip(name: &str) -> bool {
    SEARCH_SKIP_NAMES.contains(&name)
}
