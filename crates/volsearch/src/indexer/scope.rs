//! Which paths of a volume belong in the index.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::types::{EntryKind, VolumeId};
use crate::volumes::VolumeTable;

/// Directory extensions treated as opaque bundles.
const PACKAGE_EXTENSIONS: &[&str] = &[
    "app",
    "appex",
    "bundle",
    "framework",
    "kext",
    "mpkg",
    "photoslibrary",
    "pkg",
    "plugin",
    "prefpane",
    "qlgenerator",
    "rtfd",
    "xcarchive",
    "xcodeproj",
    "xcworkspace",
];

/// Crate-wide indexing rules from the configuration.
#[derive(Debug, Clone, Default)]
pub struct IndexRules {
    pub ignored_roots: Vec<PathBuf>,
    pub include_hidden: bool,
}

/// Indexing scope of one volume.
#[derive(Debug, Clone)]
pub struct ScanScope {
    pub volume: VolumeId,
    pub root: PathBuf,
    /// Configured ignored roots plus nested mounts owned by other volumes.
    pub ignored_roots: Vec<PathBuf>,
    pub include_hidden: bool,
}

impl ScanScope {
    pub fn for_volume(table: &VolumeTable, volume: VolumeId, rules: &IndexRules) -> Option<Self> {
        let root = table.get(volume)?.mount_path.clone();
        let mut ignored_roots = rules.ignored_roots.clone();
        ignored_roots.extend(table.nested_mounts(volume));
        Some(Self {
            volume,
            root,
            ignored_roots,
            include_hidden: rules.include_hidden,
        })
    }

    pub fn in_scope(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.root)
    }

    pub fn is_ignored(&self, candidate: &Path) -> bool {
        self.ignored_roots
            .iter()
            .any(|ignored| candidate == ignored || candidate.starts_with(ignored))
    }

    /// True if any component below the root is dot-prefixed.
    pub fn is_hidden(&self, candidate: &Path) -> bool {
        if self.include_hidden {
            return false;
        }
        candidate
            .strip_prefix(&self.root)
            .map(|relative| relative.iter().any(|part| is_hidden_name(part.to_string_lossy().as_ref())))
            .unwrap_or(false)
    }

    /// Paths the index must never contain.
    pub fn excludes(&self, candidate: &Path) -> bool {
        !self.in_scope(candidate) || self.is_ignored(candidate) || self.is_hidden(candidate)
    }

    /// Returns the outermost package strictly above `candidate`, if any.
    /// Package contents are represented by the package entry alone.
    pub fn enclosing_package(&self, candidate: &Path) -> Option<PathBuf> {
        let relative = candidate.strip_prefix(&self.root).ok()?;
        let mut current = self.root.clone();
        let mut parts = relative.iter().peekable();
        while let Some(part) = parts.next() {
            current.push(part);
            if parts.peek().is_some() && has_package_extension(&current) {
                return Some(current);
            }
        }
        None
    }

    pub fn classify(&self, path: &Path, metadata: &fs::Metadata) -> EntryKind {
        if path == self.root {
            EntryKind::VolumeRoot
        } else if metadata.file_type().is_dir() {
            if has_package_extension(path) {
                EntryKind::Package
            } else {
                EntryKind::Dir
            }
        } else {
            EntryKind::File
        }
    }
}

pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

pub fn has_package_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_ascii_lowercase();
            PACKAGE_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}

pub fn modified_secs(metadata: &fs::Metadata) -> Option<u64> {
    metadata
        .modified()
        .ok()
        .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_secs())
}
