//! Per-path display attributes: size, modification date and icon.
//!
//! Internal volumes are stat'ed inline on first access. External volumes get
//! a placeholder immediately while the real values are fetched on the
//! blocking pool; see [`AttributeCache`].

mod cache;
mod fetch;
mod format;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::EntryKind;

pub use cache::AttributeCache;
pub use fetch::{AttributeFetcher, FetchedAttributes, FsFetcher};
pub use format::{
    format_date, format_local_date, human_size, iso_date, DATE_PLACEHOLDER, SIZE_PLACEHOLDER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IconKind {
    Volume,
    Folder,
    Package,
    Document,
    #[default]
    PlainText,
}

impl IconKind {
    pub fn for_kind(kind: EntryKind) -> Self {
        match kind {
            EntryKind::VolumeRoot => Self::Volume,
            EntryKind::Dir => Self::Folder,
            EntryKind::Package => Self::Package,
            EntryKind::File => Self::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeEntry {
    pub size: Option<u64>,
    pub human_size: String,
    pub modified: Option<DateTime<Utc>>,
    pub formatted_date: String,
    pub iso_date: String,
    pub icon: IconKind,
    /// Values are placeholders until a background fetch lands.
    pub pending: bool,
}

impl AttributeEntry {
    pub fn resolved(size: Option<u64>, modified: Option<DateTime<Utc>>, kind: EntryKind) -> Self {
        Self {
            size,
            human_size: size.map_or_else(|| SIZE_PLACEHOLDER.to_string(), human_size),
            modified,
            formatted_date: modified
                .map_or_else(|| SIZE_PLACEHOLDER.to_string(), format_local_date),
            iso_date: modified.map_or_else(String::new, iso_date),
            icon: IconKind::for_kind(kind),
            pending: false,
        }
    }

    /// Shown for external paths until the fetch completes.
    pub fn placeholder(kind: EntryKind) -> Self {
        Self {
            size: None,
            human_size: SIZE_PLACEHOLDER.to_string(),
            modified: None,
            formatted_date: DATE_PLACEHOLDER.to_string(),
            iso_date: DATE_PLACEHOLDER.to_string(),
            icon: if kind.is_dir_like() {
                IconKind::Volume
            } else {
                IconKind::PlainText
            },
            pending: true,
        }
    }

    /// Shown when an inline stat failed.
    pub fn unavailable(kind: EntryKind) -> Self {
        Self::resolved(None, None, kind)
    }
}

impl From<FetchedAttributes> for AttributeEntry {
    fn from(fetched: FetchedAttributes) -> Self {
        Self::resolved(fetched.size, fetched.modified, fetched.kind)
    }
}
