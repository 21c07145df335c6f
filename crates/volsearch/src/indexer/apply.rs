//! Incremental updates of a volume index from changed paths.
//!
//! Changes are applied by re-checking the filesystem rather than trusting the
//! event kind, so replaying any sequence of events for paths that changed
//! converges to what a fresh walk would produce.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::scope::{modified_secs, ScanScope};
use super::snapshot::VolumeIndex;
use super::walk::{walk_path, WalkData, WalkedEntry};
use crate::types::{EntryKind, IndexEntry};

/// Result of applying one changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The path is outside this volume.
    Skipped,
    Applied,
    /// The volume root itself is gone.
    RootMissing,
}

/// Hands out the next insertion sequence number.
pub(crate) fn take_seq(next_seq: &mut u64) -> u64 {
    let seq = *next_seq;
    *next_seq += 1;
    seq
}

/// Builds a volume index from a finished walk, assigning sequence numbers in
/// walk order.
pub fn index_from_walk(
    walked: Vec<WalkedEntry>,
    scope: &ScanScope,
    next_seq: &mut u64,
) -> VolumeIndex {
    let mut index = VolumeIndex::new();
    for entry in walked {
        index.insert(IndexEntry::new(
            entry.path,
            entry.kind,
            scope.volume,
            take_seq(next_seq),
            entry.modified,
        ));
    }
    index
}

/// Brings the entry for `changed` (and what it implies) in line with disk.
pub fn apply_path_change(
    index: &mut VolumeIndex,
    scope: &ScanScope,
    changed: &Path,
    next_seq: &mut u64,
) -> ApplyOutcome {
    if !scope.in_scope(changed) {
        return ApplyOutcome::Skipped;
    }

    if scope.is_ignored(changed) || scope.is_hidden(changed) {
        index.remove_subtree(changed);
        return ApplyOutcome::Applied;
    }

    // Package contents only touch the package entry.
    let target = scope
        .enclosing_package(changed)
        .unwrap_or_else(|| changed.to_path_buf());

    let metadata = match fs::symlink_metadata(&target) {
        Ok(metadata) => metadata,
        Err(_) if target == scope.root => return ApplyOutcome::RootMissing,
        Err(_) => {
            index.remove_subtree(&target);
            return ApplyOutcome::Applied;
        }
    };

    let kind = scope.classify(&target, &metadata);
    let modified = modified_secs(&metadata);

    match index.get(&target).map(|entry| entry.kind) {
        Some(existing) if existing == kind => {
            refresh_entry(index, &target, modified);
            if matches!(kind, EntryKind::Dir | EntryKind::VolumeRoot) {
                reconcile_children(index, scope, &target, next_seq);
            }
        }
        _ => {
            index.remove_subtree(&target);
            ensure_ancestors(index, scope, &target, next_seq);
            insert_subtree(index, scope, &target, next_seq);
        }
    }
    ApplyOutcome::Applied
}

fn refresh_entry(index: &mut VolumeIndex, path: &Path, modified: Option<u64>) {
    let Some(current) = index.get(path) else {
        return;
    };
    if current.modified == modified {
        return;
    }
    let mut updated = IndexEntry::clone(current);
    updated.modified = modified;
    index.insert(updated);
}

/// Syncs the direct children of an indexed directory with its listing.
fn reconcile_children(index: &mut VolumeIndex, scope: &ScanScope, dir: &Path, next_seq: &mut u64) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    let on_disk: BTreeSet<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|child| child.path())
        .filter(|child| !scope.excludes(child))
        .collect();

    for stale in index.children_of(dir) {
        if !on_disk.contains(&stale) {
            index.remove_subtree(&stale);
        }
    }
    for child in on_disk {
        if !index.contains(&child) {
            insert_subtree(index, scope, &child, next_seq);
        }
    }
}

/// Indexes every missing ancestor between the volume root and `path`.
fn ensure_ancestors(index: &mut VolumeIndex, scope: &ScanScope, path: &Path, next_seq: &mut u64) {
    let mut missing = Vec::new();
    for ancestor in path.ancestors().skip(1) {
        if !scope.in_scope(ancestor) || index.contains(ancestor) {
            break;
        }
        missing.push(ancestor.to_path_buf());
    }

    for ancestor in missing.into_iter().rev() {
        let Ok(metadata) = fs::symlink_metadata(&ancestor) else {
            return;
        };
        let kind = scope.classify(&ancestor, &metadata);
        let modified = modified_secs(&metadata);
        index.insert(IndexEntry::new(
            ancestor,
            kind,
            scope.volume,
            take_seq(next_seq),
            modified,
        ));
    }
}

fn insert_subtree(index: &mut VolumeIndex, scope: &ScanScope, path: &Path, next_seq: &mut u64) {
    let Some(mut walked) = walk_path(path, &WalkData::new(scope)) else {
        return;
    };
    walked.sort_unstable_by(|left, right| left.path.cmp(&right.path));
    for entry in walked {
        index.insert(IndexEntry::new(
            entry.path,
            entry.kind,
            scope.volume,
            take_seq(next_seq),
            entry.modified,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::walk::walk_volume;
    use crate::types::VolumeId;
    use std::fs::File;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        scope: ScanScope,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let root = fs::canonicalize(temp.path()).unwrap();
            let scope = ScanScope {
                volume: VolumeId(0),
                root: root.clone(),
                ignored_roots: vec![root.join("ignored")],
                include_hidden: false,
            };
            Self {
                _temp: temp,
                root,
                scope,
            }
        }

        fn fresh_index(&self) -> VolumeIndex {
            let walked = walk_volume(&WalkData::new(&self.scope)).unwrap();
            index_from_walk(walked, &self.scope, &mut 0)
        }

        fn apply(&self, index: &mut VolumeIndex, relative: &str) -> ApplyOutcome {
            apply_path_change(index, &self.scope, &self.root.join(relative), &mut 1_000)
        }
    }

    fn listing(index: &VolumeIndex) -> Vec<(PathBuf, EntryKind)> {
        index
            .iter()
            .map(|entry| (entry.path.clone(), entry.kind))
            .collect()
    }

    #[test]
    fn created_file_is_indexed_with_missing_ancestors() {
        let fixture = Fixture::new();
        let mut index = fixture.fresh_index();

        fs::create_dir_all(fixture.root.join("a/b")).unwrap();
        File::create(fixture.root.join("a/b/new.txt")).unwrap();
        assert_eq!(fixture.apply(&mut index, "a/b/new.txt"), ApplyOutcome::Applied);

        assert!(index.contains(&fixture.root.join("a")));
        assert!(index.contains(&fixture.root.join("a/b")));
        let entry = index.get(&fixture.root.join("a/b/new.txt")).unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert!(entry.seq >= 1_000);
    }

    #[test]
    fn removed_directory_drops_its_subtree() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.root.join("docs/deep")).unwrap();
        File::create(fixture.root.join("docs/deep/a.txt")).unwrap();
        let mut index = fixture.fresh_index();
        assert_eq!(index.len(), 4);

        fs::remove_dir_all(fixture.root.join("docs")).unwrap();
        fixture.apply(&mut index, "docs");
        assert_eq!(listing(&index), vec![(fixture.root.clone(), EntryKind::VolumeRoot)]);
    }

    #[test]
    fn parent_modification_reconciles_children() {
        let fixture = Fixture::new();
        fs::create_dir(fixture.root.join("docs")).unwrap();
        File::create(fixture.root.join("docs/old.txt")).unwrap();
        let mut index = fixture.fresh_index();

        fs::remove_file(fixture.root.join("docs/old.txt")).unwrap();
        File::create(fixture.root.join("docs/new.txt")).unwrap();
        fixture.apply(&mut index, "docs");

        assert!(!index.contains(&fixture.root.join("docs/old.txt")));
        assert!(index.contains(&fixture.root.join("docs/new.txt")));
    }

    #[test]
    fn changes_inside_packages_touch_only_the_package() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.root.join("Tool.app/Contents")).unwrap();
        let mut index = fixture.fresh_index();

        File::create(fixture.root.join("Tool.app/Contents/Info.plist")).unwrap();
        fixture.apply(&mut index, "Tool.app/Contents/Info.plist");

        assert!(!index.contains(&fixture.root.join("Tool.app/Contents/Info.plist")));
        assert_eq!(
            index.get(&fixture.root.join("Tool.app")).unwrap().kind,
            EntryKind::Package
        );
    }

    #[test]
    fn ignored_and_foreign_paths() {
        let fixture = Fixture::new();
        fs::create_dir(fixture.root.join("ignored")).unwrap();
        File::create(fixture.root.join("ignored/a.txt")).unwrap();
        let mut index = fixture.fresh_index();

        assert_eq!(fixture.apply(&mut index, "ignored/a.txt"), ApplyOutcome::Applied);
        assert!(!index.contains(&fixture.root.join("ignored/a.txt")));
        assert_eq!(
            apply_path_change(&mut index, &fixture.scope, Path::new("/elsewhere/x"), &mut 0),
            ApplyOutcome::Skipped
        );
    }

    #[test]
    fn missing_root_is_reported() {
        let fixture = Fixture::new();
        let mut index = fixture.fresh_index();
        let scope = ScanScope {
            root: fixture.root.join("unmounted"),
            ..fixture.scope.clone()
        };
        let root = scope.root.clone();
        assert_eq!(
            apply_path_change(&mut index, &scope, &root, &mut 0),
            ApplyOutcome::RootMissing
        );
    }

    #[test]
    fn file_replaced_by_directory_is_reindexed() {
        let fixture = Fixture::new();
        File::create(fixture.root.join("thing")).unwrap();
        let mut index = fixture.fresh_index();

        fs::remove_file(fixture.root.join("thing")).unwrap();
        fs::create_dir(fixture.root.join("thing")).unwrap();
        File::create(fixture.root.join("thing/inner.txt")).unwrap();
        fixture.apply(&mut index, "thing");

        assert_eq!(index.get(&fixture.root.join("thing")).unwrap().kind, EntryKind::Dir);
        assert!(index.contains(&fixture.root.join("thing/inner.txt")));
    }

    #[test]
    fn replaying_changed_paths_converges_to_a_fresh_walk() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.root.join("photos/2024")).unwrap();
        File::create(fixture.root.join("photos/2024/a.jpg")).unwrap();
        File::create(fixture.root.join("notes.txt")).unwrap();
        let mut index = fixture.fresh_index();

        let mut changed = Vec::new();
        fs::rename(fixture.root.join("photos"), fixture.root.join("pictures")).unwrap();
        changed.extend(["photos", "pictures"]);
        File::create(fixture.root.join("pictures/2024/b.jpg")).unwrap();
        changed.push("pictures/2024/b.jpg");
        fs::remove_file(fixture.root.join("notes.txt")).unwrap();
        changed.push("notes.txt");
        fs::create_dir(fixture.root.join("notes.txt")).unwrap();
        changed.push("notes.txt");
        File::create(fixture.root.join(".hidden")).unwrap();
        changed.push(".hidden");

        for path in changed {
            fixture.apply(&mut index, path);
        }

        assert_eq!(listing(&index), listing(&fixture.fresh_index()));
    }
}
