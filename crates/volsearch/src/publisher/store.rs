//! Observable state and the event bus.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::view::QueryState;
use crate::types::{ScoredResult, VolumeId};

/// One observable field. Readers subscribe with `watch` receivers; only the
/// publisher actor writes.
#[derive(Debug)]
pub struct Published<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Published<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Stores `value` and notifies only when it differs. Returns whether it
    /// changed.
    pub(crate) fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Stores `value` and always notifies.
    pub(crate) fn replace(&self, value: T) {
        self.tx.send_replace(value);
    }
}

pub type ResultList = Arc<Vec<ScoredResult>>;

/// Everything a front-end renders from.
#[derive(Debug)]
pub struct PublishedState {
    pub results: Published<ResultList>,
    pub recents: Published<ResultList>,
    pub indexing: Published<bool>,
    /// Human readable description of the background work, empty when idle.
    pub operation: Published<String>,
    pub has_full_disk_access: Published<bool>,
    pub enabled_volumes: Published<Vec<VolumeId>>,
    pub query: Published<QueryState>,
}

impl PublishedState {
    pub fn new(query: QueryState) -> Self {
        Self {
            results: Published::new(Arc::new(Vec::new())),
            recents: Published::new(Arc::new(Vec::new())),
            indexing: Published::new(false),
            operation: Published::new(String::new()),
            has_full_disk_access: Published::new(true),
            enabled_volumes: Published::new(Vec::new()),
            query: Published::new(query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    ResultsUpdated { generation: u64, count: usize },
    RecentsUpdated { count: usize },
    IndexingChanged(bool),
    OperationChanged(String),
    FullDiskAccessChanged(bool),
    EnabledVolumesChanged(Vec<VolumeId>),
    WatchFailed { volume: VolumeId, root: PathBuf, message: String },
    RebuildFinished { volume: VolumeId, entries: usize },
    RebuildFailed { volume: VolumeId, message: String },
}

#[derive(Clone, Debug)]
pub struct Bus {
    sender: broadcast::Sender<SearchEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.sender.subscribe()
    }

    pub fn publish(
        &self,
        event: SearchEvent,
    ) -> Result<usize, broadcast::error::SendError<SearchEvent>> {
        self.sender.send(event)
    }
}
