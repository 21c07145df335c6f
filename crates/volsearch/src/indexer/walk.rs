//! Parallel full scan of one volume.
//!
//! Directories are read with `rayon`, children are walked in parallel and the
//! flattened result is sorted by path so a rebuild assigns insertion order
//! deterministically.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use rayon::prelude::*;

use super::build::IndexBuildProgress;
use super::scope::{is_hidden_name, modified_secs, ScanScope};
use crate::cancel::CancellationToken;
use crate::types::EntryKind;

/// One path discovered by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub modified: Option<u64>,
}

/// Walk configuration and shared counters.
#[derive(Debug)]
pub struct WalkData<'a> {
    pub scope: &'a ScanScope,
    pub cancel: CancellationToken,
    pub progress: Option<&'a IndexBuildProgress>,
}

impl<'a> WalkData<'a> {
    pub fn new(scope: &'a ScanScope) -> Self {
        Self {
            scope,
            cancel: CancellationToken::noop(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a IndexBuildProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn count_dir(&self) {
        if let Some(progress) = self.progress {
            progress.scanned_dirs.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_file(&self) {
        if let Some(progress) = self.progress {
            progress.scanned_files.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Walks the volume root. Returns `None` if cancelled.
pub fn walk_volume(walk_data: &WalkData) -> Option<Vec<WalkedEntry>> {
    let mut entries = walk_path(&walk_data.scope.root, walk_data)?;
    walk_data.cancel.is_cancelled()?;
    entries.sort_unstable_by(|left, right| left.path.cmp(&right.path));
    Some(entries)
}

/// Walks `path` and everything below it that the scope admits.
/// Unreadable paths are skipped, unreadable directories keep their own entry.
pub fn walk_path(path: &Path, walk_data: &WalkData) -> Option<Vec<WalkedEntry>> {
    walk_data.cancel.is_cancelled()?;

    let scope = walk_data.scope;
    if scope.excludes(path) {
        return Some(Vec::new());
    }

    let Ok(metadata) = fs::symlink_metadata(path) else {
        return Some(Vec::new());
    };
    let kind = scope.classify(path, &metadata);
    let entry = WalkedEntry {
        path: path.to_path_buf(),
        kind,
        modified: modified_secs(&metadata),
    };

    if kind == EntryKind::File {
        walk_data.count_file();
        return Some(vec![entry]);
    }

    walk_data.count_dir();
    if kind == EntryKind::Package {
        return Some(vec![entry]);
    }

    let Ok(read_dir) = fs::read_dir(path) else {
        return Some(vec![entry]);
    };
    let children: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .filter(|child| {
            scope.include_hidden || !is_hidden_name(child.file_name().to_string_lossy().as_ref())
        })
        .map(|child| child.path())
        .collect();

    let nested: Vec<Vec<WalkedEntry>> = children
        .into_par_iter()
        .map(|child| walk_path(&child, walk_data))
        .collect::<Option<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(1 + nested.iter().map(Vec::len).sum::<usize>());
    entries.push(entry);
    entries.extend(nested.into_iter().flatten());
    Some(entries)
}
