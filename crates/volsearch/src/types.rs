//! Core value types shared by the indexer, query engine and publisher.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeEntry;
use crate::query::fold_str;

/// Stable identifier of a volume. Entries refer to their volume through this
/// key and resolve it in the [`crate::volumes::VolumeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub u32);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A mounted filesystem: internal disk, external disk or network share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub mount_path: PathBuf,
    /// Internal volumes are cheap to stat; external and network volumes
    /// fetch attributes in the background.
    pub internal: bool,
    pub enabled: bool,
}

impl Volume {
    pub fn new(id: VolumeId, mount_path: impl Into<PathBuf>, internal: bool) -> Self {
        let mount_path = mount_path.into();
        let name = mount_path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| mount_path.to_string_lossy().into_owned());
        Self {
            id,
            name,
            mount_path,
            internal,
            enabled: true,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.mount_path)
    }
}

/// Entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    VolumeRoot,
    Dir,
    Package,
    File,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VolumeRoot => "volume",
            Self::Dir => "directory",
            Self::Package => "package",
            Self::File => "file",
        }
    }

    pub fn is_dir_like(self) -> bool {
        !matches!(self, Self::File)
    }
}

/// One indexed filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub parent: PathBuf,
    pub name: String,
    /// Lowercased `name`, the key fuzzy matching runs against.
    pub match_key: String,
    pub kind: EntryKind,
    pub volume: VolumeId,
    /// Monotonic insertion order assigned by the indexer.
    pub seq: u64,
    /// Modification time in Unix seconds as observed when indexed.
    pub modified: Option<u64>,
}

impl IndexEntry {
    pub fn new(
        path: PathBuf,
        kind: EntryKind,
        volume: VolumeId,
        seq: u64,
        modified: Option<u64>,
    ) -> Self {
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone());
        Self {
            match_key: fold_str(&name),
            path,
            parent,
            name,
            kind,
            volume,
            seq,
            modified,
        }
    }
}

/// Metadata describing how a result matched the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchInfo {
    /// Character positions in the entry name that matched, ascending.
    pub positions: Vec<usize>,
    /// Number of ancestor directory components matched by path segments.
    pub matched_segments: usize,
}

/// An index entry with its score and match metadata.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub entry: Arc<IndexEntry>,
    pub score: i64,
    pub matched: MatchInfo,
    /// Attributes known when the result set was assembled, used for size and
    /// date ordering.
    pub attributes: Option<AttributeEntry>,
}

impl ScoredResult {
    pub fn unscored(entry: Arc<IndexEntry>) -> Self {
        Self {
            entry,
            score: 0,
            matched: MatchInfo::default(),
            attributes: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn size(&self) -> u64 {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.size)
            .unwrap_or(0)
    }

    pub fn modified(&self) -> i64 {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.modified)
            .map(|date| date.timestamp())
            .unwrap_or(i64::MIN)
    }
}

impl PartialEq for ScoredResult {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry && self.score == other.score && self.matched == other.matched
    }
}

/// Index status information for the front-end status bar.
#[derive(Debug, Clone, Default)]
pub struct IndexStatus {
    pub state: String,
    pub indexed_entries: usize,
    pub scanned_files: usize,
    pub scanned_dirs: usize,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub rescan_count: u64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_derives_name_parent_and_match_key() {
        let entry = IndexEntry::new(
            PathBuf::from("/Users/a/ReadMe.TXT"),
            EntryKind::File,
            VolumeId(0),
            7,
            None,
        );
        assert_eq!(entry.name, "ReadMe.TXT");
        assert_eq!(entry.match_key, "readme.txt");
        assert_eq!(entry.parent, PathBuf::from("/Users/a"));
        assert_eq!(entry.seq, 7);
    }

    #[test]
    fn volume_name_defaults_to_last_component() {
        let volume = Volume::new(VolumeId(3), "/Volumes/USB", false);
        assert_eq!(volume.name, "USB");
        assert!(volume.contains(Path::new("/Volumes/USB/photos")));
        assert!(!volume.contains(Path::new("/Volumes/USB2")));

        let root = Volume::new(VolumeId(0), "/", true);
        assert_eq!(root.name, "/");
    }

    #[test]
    fn unattributed_results_sort_as_empty_and_oldest() {
        let entry = Arc::new(IndexEntry::new(
            PathBuf::from("/a"),
            EntryKind::File,
            VolumeId(0),
            0,
            None,
        ));
        let result = ScoredResult::unscored(entry);
        assert_eq!(result.size(), 0);
        assert_eq!(result.modified(), i64::MIN);
    }
}
