//! Real-time fuzzy file search over mounted volumes.
//!
//! This crate provides the back-end of a file launcher:
//! - Per-volume watching with debounced, coalesced event batches
//! - A continuously updated, snapshot-consistent path index
//! - Fuzzy matching and ranking with a total tie-break
//! - Folder, quick and volume filters plus a pure sorter
//! - A background attribute cache with at most one fetch per path
//! - An actor publishing `recents` and `results` to the front-end
//!
//! [`SearchContext`] ties these together.

pub mod attributes;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod open_with;
pub mod publisher;
pub mod query;
pub mod sort;
pub mod types;
pub mod volumes;
pub mod watcher;

// Re-export main types
pub use attributes::{AttributeCache, AttributeEntry, AttributeFetcher, FsFetcher, IconKind};
pub use cancel::{CancellationToken, GenerationTracker};
pub use config::{QueryConfig, SearchConfig, VolumeConfig, WatchConfig};
pub use context::SearchContext;
pub use error::{Result, SearchError};
pub use filter::{FilterChain, FilterShortcut, FolderFilter, QuickFilter, VolumeFilter};
pub use indexer::{IndexRules, IndexSnapshot, Indexer, RebuildOutcome};
pub use open_with::OpenWithTable;
pub use publisher::{QueryState, ResultList, SearchEvent};
pub use query::{fuzzy_match, ParsedQuery};
pub use sort::{sort, SortField, SortState};
pub use types::{EntryKind, IndexEntry, IndexStatus, MatchInfo, ScoredResult, Volume, VolumeId};
pub use volumes::VolumeTable;
pub use watcher::{NotifyBackend, VolumeEvent, VolumeEventKind, VolumeWatcher, WatchBackend};
