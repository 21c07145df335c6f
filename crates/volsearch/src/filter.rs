//! Result filters: folder roots, saved queries and a volume restriction.
//!
//! The three filters toggle independently. Folder and volume filters narrow
//! the candidate set; a quick filter contributes its saved query, which is
//! combined with the typed query.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::indexer::IndexSnapshot;
use crate::types::{IndexEntry, VolumeId};

/// Restricts results to paths under any of `folders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderFilter {
    pub id: String,
    pub folders: Vec<PathBuf>,
    #[serde(default)]
    pub key: Option<char>,
}

impl FolderFilter {
    /// Builds an ad-hoc filter from paths handed to the launcher. Paths that
    /// do not exist are dropped; `None` if nothing is left.
    pub fn from_paths<I, P>(paths: I) -> Option<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let folders: Vec<PathBuf> = paths
            .into_iter()
            .map(Into::into)
            .filter(|path| path.exists())
            .collect();
        let id = match folders.as_slice() {
            [] => return None,
            [single] => single
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| single.to_string_lossy().into_owned()),
            _ => "Custom".to_string(),
        };
        Some(Self {
            id,
            folders,
            key: None,
        })
    }

    pub fn admits(&self, path: &Path) -> bool {
        self.folders.iter().any(|folder| path.starts_with(folder))
    }
}

/// A saved query combined with whatever the user types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuickFilter {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub key: Option<char>,
}

/// One volume, or every volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeFilter {
    #[default]
    All,
    Volume(VolumeId),
}

impl VolumeFilter {
    pub fn admits(&self, volume: VolumeId) -> bool {
        match self {
            Self::All => true,
            Self::Volume(id) => *id == volume,
        }
    }

    /// Digit shortcut: `0` is every volume, `n` the n-th enabled volume.
    pub fn from_shortcut_index(index: usize, enabled: &[VolumeId]) -> Option<Self> {
        match index {
            0 => Some(Self::All),
            n => enabled.get(n - 1).copied().map(Self::Volume),
        }
    }
}

/// Keyboard input understood by [`FilterChain::apply_shortcut`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterShortcut {
    /// Option plus a character: selects the folder and/or quick filter
    /// bound to that key.
    Option(char),
    /// Option plus a digit: selects a volume filter.
    Digit(u8),
    Escape,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    pub folder: Option<FolderFilter>,
    pub quick: Option<QuickFilter>,
    pub volume: VolumeFilter,
}

impl FilterChain {
    pub fn admits(&self, entry: &IndexEntry) -> bool {
        self.volume.admits(entry.volume)
            && self
                .folder
                .as_ref()
                .map_or(true, |folder| folder.admits(&entry.path))
    }

    /// The query actually matched: the quick filter's saved query followed by
    /// the typed query.
    pub fn effective_query(&self, typed: &str) -> String {
        match &self.quick {
            Some(quick) if typed.trim().is_empty() => quick.query.clone(),
            Some(quick) => format!("{} {}", quick.query, typed),
            None => typed.to_string(),
        }
    }

    /// Drops every filter in one step.
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    pub fn is_unrestricted(&self) -> bool {
        self.folder.is_none() && self.quick.is_none() && self.volume == VolumeFilter::All
    }

    /// Whether the candidate set is narrowed. Quick filters only change the
    /// query.
    pub fn restricts_scope(&self) -> bool {
        self.folder.is_some() || self.volume != VolumeFilter::All
    }

    /// Entries of `snapshot` admitted by the folder and volume filters.
    pub fn candidates(&self, snapshot: &IndexSnapshot) -> Vec<Arc<IndexEntry>> {
        let volumes: Vec<VolumeId> = match self.volume {
            VolumeFilter::All => snapshot.volume_ids().collect(),
            VolumeFilter::Volume(id) => vec![id],
        };
        volumes
            .into_iter()
            .filter_map(|id| snapshot.volume(id))
            .flat_map(|volume| volume.iter())
            .filter(|entry| {
                self.folder
                    .as_ref()
                    .map_or(true, |folder| folder.admits(&entry.path))
            })
            .cloned()
            .collect()
    }

    /// Applies a keyboard shortcut. Returns whether it was handled.
    ///
    /// A key bound to both a folder filter and a quick filter selects both.
    pub fn apply_shortcut(
        &mut self,
        shortcut: FilterShortcut,
        folder_filters: &[FolderFilter],
        quick_filters: &[QuickFilter],
        enabled_volumes: &[VolumeId],
    ) -> bool {
        match shortcut {
            FilterShortcut::Escape => {
                self.clear_all();
                true
            }
            FilterShortcut::Option(key) => {
                let matches = |bound: Option<char>| {
                    bound.is_some_and(|bound| bound.eq_ignore_ascii_case(&key))
                };
                let mut handled = false;
                if let Some(filter) = folder_filters.iter().find(|filter| matches(filter.key)) {
                    self.folder = Some(filter.clone());
                    handled = true;
                }
                if let Some(filter) = quick_filters.iter().find(|filter| matches(filter.key)) {
                    self.quick = Some(filter.clone());
                    handled = true;
                }
                handled
            }
            FilterShortcut::Digit(digit) => {
                match VolumeFilter::from_shortcut_index(digit as usize, enabled_volumes) {
                    Some(filter) => {
                        self.volume = filter;
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::VolumeIndex;
    use crate::types::EntryKind;
    use tempfile::TempDir;

    fn entry(path: &str, volume: u32) -> IndexEntry {
        IndexEntry::new(PathBuf::from(path), EntryKind::File, VolumeId(volume), 0, None)
    }

    fn work() -> FolderFilter {
        FolderFilter {
            id: "Work".into(),
            folders: vec![PathBuf::from("/Users/a/work"), PathBuf::from("/srv")],
            key: Some('w'),
        }
    }

    fn pdfs() -> QuickFilter {
        QuickFilter {
            id: "PDFs".into(),
            query: "pdf$".into(),
            key: Some('p'),
        }
    }

    #[test]
    fn folder_filter_matches_whole_components() {
        let filter = work();
        assert!(filter.admits(Path::new("/Users/a/work/plan.txt")));
        assert!(filter.admits(Path::new("/srv/x")));
        assert!(!filter.admits(Path::new("/Users/a/workshop/plan.txt")));
    }

    #[test]
    fn from_paths_names_single_folder_and_drops_missing() {
        let temp = TempDir::new().unwrap();
        let docs = temp.path().join("Docs");
        let music = temp.path().join("Music");
        std::fs::create_dir(&docs).unwrap();
        std::fs::create_dir(&music).unwrap();

        let single = FolderFilter::from_paths([docs.clone(), temp.path().join("missing")]).unwrap();
        assert_eq!(single.id, "Docs");
        assert_eq!(single.folders, vec![docs.clone()]);

        let custom = FolderFilter::from_paths([docs, music]).unwrap();
        assert_eq!(custom.id, "Custom");
        assert!(FolderFilter::from_paths([temp.path().join("missing")]).is_none());
    }

    #[test]
    fn quick_filter_prefixes_typed_query() {
        let mut chain = FilterChain::default();
        assert_eq!(chain.effective_query("doc"), "doc");
        chain.quick = Some(pdfs());
        assert_eq!(chain.effective_query("doc"), "pdf$ doc");
        assert_eq!(chain.effective_query("  "), "pdf$");
        assert!(!chain.restricts_scope());
    }

    #[test]
    fn filters_compose_and_clear_all_restores_everything() {
        let mut snapshot = IndexSnapshot::default();
        snapshot
            .volume_mut(VolumeId(0))
            .insert(entry("/Users/a/work/a.pdf", 0));
        snapshot.volume_mut(VolumeId(0)).insert(entry("/Users/a/b.pdf", 0));
        snapshot.volume_mut(VolumeId(1)).insert(entry("/srv/c.pdf", 1));
        let everything = FilterChain::default().candidates(&snapshot);
        assert_eq!(everything.len(), 3);

        let mut chain = FilterChain {
            folder: Some(work()),
            quick: Some(pdfs()),
            volume: VolumeFilter::Volume(VolumeId(1)),
        };
        let narrowed = chain.candidates(&snapshot);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].path, PathBuf::from("/srv/c.pdf"));
        assert!(!chain.admits(&entry("/Users/a/work/a.pdf", 0)));

        chain.clear_all();
        assert!(chain.is_unrestricted());
        assert_eq!(chain.candidates(&snapshot), everything);
    }

    #[test]
    fn candidates_skip_unknown_volume() {
        let mut snapshot = IndexSnapshot::default();
        snapshot.replace_volume(VolumeId(0), VolumeIndex::new());
        let chain = FilterChain {
            volume: VolumeFilter::Volume(VolumeId(5)),
            ..FilterChain::default()
        };
        assert!(chain.candidates(&snapshot).is_empty());
    }

    #[test]
    fn shortcuts_select_and_clear_filters() {
        let folders = [work()];
        let quicks = [pdfs()];
        let enabled = [VolumeId(0), VolumeId(3)];
        let mut chain = FilterChain::default();

        assert!(chain.apply_shortcut(FilterShortcut::Option('W'), &folders, &quicks, &enabled));
        assert_eq!(chain.folder.as_ref().map(|f| f.id.as_str()), Some("Work"));
        assert!(chain.apply_shortcut(FilterShortcut::Option('p'), &folders, &quicks, &enabled));
        assert_eq!(chain.quick.as_ref().map(|f| f.id.as_str()), Some("PDFs"));
        assert!(!chain.apply_shortcut(FilterShortcut::Option('z'), &folders, &quicks, &enabled));

        assert!(chain.apply_shortcut(FilterShortcut::Digit(2), &folders, &quicks, &enabled));
        assert_eq!(chain.volume, VolumeFilter::Volume(VolumeId(3)));
        assert!(!chain.apply_shortcut(FilterShortcut::Digit(7), &folders, &quicks, &enabled));
        assert!(chain.apply_shortcut(FilterShortcut::Digit(0), &folders, &quicks, &enabled));
        assert_eq!(chain.volume, VolumeFilter::All);

        assert!(chain.apply_shortcut(FilterShortcut::Escape, &folders, &quicks, &enabled));
        assert!(chain.is_unrestricted());
    }
}
