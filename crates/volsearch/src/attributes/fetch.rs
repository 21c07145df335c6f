use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{Result, SearchError};
use crate::indexer::has_package_extension;
use crate::types::EntryKind;

/// Raw attributes read from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAttributes {
    /// `None` for directories and packages.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub kind: EntryKind,
}

/// Reads attributes of one path. Runs on the blocking pool for external
/// volumes, so implementations may block.
pub trait AttributeFetcher: Send + Sync + 'static {
    fn fetch(&self, path: &Path) -> Result<FetchedAttributes>;
}

/// Reads attributes with `fs::metadata`, following symlinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFetcher;

impl AttributeFetcher for FsFetcher {
    fn fetch(&self, path: &Path) -> Result<FetchedAttributes> {
        let metadata =
            fs::metadata(path).map_err(|error| SearchError::stat(path.to_path_buf(), error))?;
        let kind = if !metadata.is_dir() {
            EntryKind::File
        } else if has_package_extension(path) {
            EntryKind::Package
        } else {
            EntryKind::Dir
        };
        Ok(FetchedAttributes {
            size: (kind == EntryKind::File).then(|| metadata.len()),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            kind,
        })
    }
}
