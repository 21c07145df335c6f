//! Immutable index snapshots.
//!
//! A snapshot maps each volume to an `Arc<VolumeIndex>`. Writers clone the
//! snapshot shell (cheap, one `Arc` per volume) and copy-on-write only the
//! volume they touch, so readers holding an older snapshot never observe a
//! partial update.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{IndexEntry, VolumeId};

/// Entries of one volume keyed by absolute path.
///
/// `PathBuf` ordering is component-wise, so a directory's descendants form a
/// contiguous range directly after it.
#[derive(Debug, Clone, Default)]
pub struct VolumeIndex {
    entries: BTreeMap<PathBuf, Arc<IndexEntry>>,
    newest_modified: Option<u64>,
}

impl VolumeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<IndexEntry>> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexEntry>> {
        self.entries.values()
    }

    pub fn newest_modified(&self) -> Option<u64> {
        self.newest_modified
    }

    /// Inserts or replaces the entry at `entry.path`.
    pub fn insert(&mut self, entry: IndexEntry) {
        if let Some(modified) = entry.modified {
            self.newest_modified = Some(self.newest_modified.map_or(modified, |n| n.max(modified)));
        }
        self.entries.insert(entry.path.clone(), Arc::new(entry));
    }

    /// Removes `path` and all of its descendants. Returns how many were removed.
    pub fn remove_subtree(&mut self, path: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .entries
            .range::<Path, _>((Bound::Included(path), Bound::Unbounded))
            .take_while(|(candidate, _)| candidate.starts_with(path))
            .map(|(candidate, _)| candidate.clone())
            .collect();
        for candidate in &doomed {
            self.entries.remove(candidate);
        }
        doomed.len()
    }

    /// Direct children of `dir` currently in the index.
    pub fn children_of(&self, dir: &Path) -> Vec<PathBuf> {
        self.entries
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(|(candidate, _)| candidate.starts_with(dir))
            .filter(|(candidate, _)| candidate.parent() == Some(dir))
            .map(|(candidate, _)| candidate.clone())
            .collect()
    }
}

/// A consistent view of every volume's entries.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    version: u64,
    volumes: BTreeMap<VolumeId, Arc<VolumeIndex>>,
}

impl IndexSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.volumes.values().map(|volume| volume.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.values().all(|volume| volume.is_empty())
    }

    pub fn volume(&self, id: VolumeId) -> Option<&VolumeIndex> {
        self.volumes.get(&id).map(Arc::as_ref)
    }

    pub fn volume_ids(&self) -> impl Iterator<Item = VolumeId> + '_ {
        self.volumes.keys().copied()
    }

    /// Merged cross-volume view, in volume then path order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<IndexEntry>> {
        self.volumes.values().flat_map(|volume| volume.iter())
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<IndexEntry>> {
        self.volumes.values().find_map(|volume| volume.get(path))
    }

    pub fn newest_modified(&self) -> Option<u64> {
        self.volumes
            .values()
            .filter_map(|volume| volume.newest_modified())
            .max()
    }

    /// Starts the next version from this one.
    pub(crate) fn successor(&self) -> Self {
        Self {
            version: self.version + 1,
            volumes: self.volumes.clone(),
        }
    }

    /// Mutable access to one volume, cloning its map if readers still share it.
    pub(crate) fn volume_mut(&mut self, id: VolumeId) -> &mut VolumeIndex {
        Arc::make_mut(self.volumes.entry(id).or_default())
    }

    pub(crate) fn replace_volume(&mut self, id: VolumeId, index: VolumeIndex) {
        self.volumes.insert(id, Arc::new(index));
    }

    pub(crate) fn remove_volume(&mut self, id: VolumeId) -> bool {
        self.volumes.remove(&id).is_some()
    }
}
