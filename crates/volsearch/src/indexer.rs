//! Volume indexing.
//!
//! The [`Indexer`] owns the current [`IndexSnapshot`] and is its only writer.
//! Readers grab an `Arc` to the latest snapshot and never block writers for
//! longer than the pointer swap.
//!
//! ## Rebuilds
//!
//! A rebuild walks one volume without holding any lock. Events for that volume
//! arriving meanwhile are queued and replayed on top of the fresh walk before
//! it is swapped in, so nothing observed during the walk is lost. Starting a
//! new rebuild, disabling the volume or removing it cancels the walk in flight
//! and its result is dropped.

mod apply;
mod build;
mod scope;
mod snapshot;
mod walk;

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::cancel::{CancellationToken, GenerationTracker};
use crate::error::{Result, SearchError};
use crate::types::{IndexStatus, VolumeId};
use crate::volumes::VolumeTable;
use crate::watcher::{VolumeEvent, VolumeEventKind};

pub use apply::{apply_path_change, index_from_walk, ApplyOutcome};
pub use build::{unix_now_secs, IndexBuildProgress, IndexBuildState, ProgressSnapshot};
pub use scope::{has_package_extension, is_hidden_name, IndexRules, ScanScope};
pub use snapshot::{IndexSnapshot, VolumeIndex};
pub use walk::{walk_path, walk_volume, WalkData, WalkedEntry};

/// Queued events per rebuilding volume before the queue collapses into a
/// single rescan request.
const MAX_PENDING_EVENTS: usize = 1 << 16;

/// A rebuild that has been registered but not yet walked.
#[derive(Debug)]
pub struct RebuildTicket {
    pub volume: VolumeId,
    scope: ScanScope,
    token: CancellationToken,
}

/// A rebuild that ran to completion. Cancellation is reported as
/// [`SearchError::ScanCancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub entries: usize,
    /// A queued event asked for another full rescan.
    pub rescan_requested: bool,
}

/// What applying a batch of events requires from the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Volumes that lost events and need a rebuild.
    pub rebuild: Vec<VolumeId>,
    /// Volumes whose root disappeared.
    pub unmounted: Vec<VolumeId>,
    /// Whether a new snapshot was published.
    pub changed: bool,
}

#[derive(Debug, Default)]
struct WriterState {
    next_seq: u64,
    /// Events held back while their volume rebuilds.
    pending: FnvHashMap<VolumeId, Vec<VolumeEvent>>,
}

#[derive(Debug, Default)]
struct BuildSlot {
    tracker: GenerationTracker,
    active: Option<u64>,
}

#[derive(Debug)]
pub struct Indexer {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<WriterState>,
    builds: Mutex<FnvHashMap<VolumeId, BuildSlot>>,
    volumes: Arc<RwLock<VolumeTable>>,
    rules: IndexRules,
    build_state: AtomicU8,
    progress: IndexBuildProgress,
    last_error: Mutex<Option<String>>,
    version_tx: watch::Sender<u64>,
}

impl Indexer {
    pub fn new(volumes: Arc<RwLock<VolumeTable>>, rules: IndexRules) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(WriterState::default()),
            builds: Mutex::new(FnvHashMap::default()),
            volumes,
            rules,
            build_state: AtomicU8::new(IndexBuildState::Idle as u8),
            progress: IndexBuildProgress::default(),
            last_error: Mutex::new(None),
            version_tx,
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Notifies with the snapshot version every time a new one is published.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    pub fn volumes(&self) -> &Arc<RwLock<VolumeTable>> {
        &self.volumes
    }

    pub fn state(&self) -> IndexBuildState {
        IndexBuildState::load(&self.build_state)
    }

    pub fn is_indexing(&self) -> bool {
        self.state() == IndexBuildState::Building
    }

    /// Volumes with a rebuild in flight, in id order.
    pub fn indexing_volumes(&self) -> Vec<VolumeId> {
        let builds = self.builds.lock();
        let mut volumes: Vec<VolumeId> = builds
            .iter()
            .filter(|(_, slot)| slot.active.is_some())
            .map(|(volume, _)| *volume)
            .collect();
        volumes.sort();
        volumes
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn status(&self) -> IndexStatus {
        let progress = self.progress.snapshot();
        IndexStatus {
            state: self.state().as_str().to_string(),
            indexed_entries: self.snapshot().len(),
            scanned_files: progress.scanned_files,
            scanned_dirs: progress.scanned_dirs,
            started_at: progress.started_at,
            finished_at: progress.finished_at,
            rescan_count: progress.rescan_count,
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Registers a rebuild of `volume`, cancelling any rebuild already running
    /// for it. Events for the volume are queued from here on.
    pub fn begin_rebuild(&self, volume: VolumeId) -> Result<RebuildTicket> {
        let scope = {
            let table = self.volumes.read();
            let entry = table.get(volume).ok_or(SearchError::UnknownVolume(volume))?;
            if !entry.enabled {
                return Err(SearchError::InvalidInput(format!(
                    "volume {volume} is disabled"
                )));
            }
            ScanScope::for_volume(&table, volume, &self.rules)
                .ok_or(SearchError::UnknownVolume(volume))?
        };

        let mut writer = self.writer.lock();
        let mut builds = self.builds.lock();
        let none_active = builds.values().all(|slot| slot.active.is_none());
        let slot = builds.entry(volume).or_default();
        let token = slot.tracker.begin();
        slot.active = Some(token.version());
        writer.pending.entry(volume).or_default();

        if none_active {
            self.progress.reset_for_build(unix_now_secs());
        } else {
            self.progress.rescan_count.fetch_add(1, Ordering::Relaxed);
        }
        self.set_state(IndexBuildState::Building);

        log::info!(
            "index rebuild started volume={volume} root={} generation={}",
            scope.root.display(),
            token.version()
        );
        Ok(RebuildTicket {
            volume,
            scope,
            token,
        })
    }

    /// Walks the ticket's volume and swaps the result in. Blocking.
    pub fn run_rebuild(&self, ticket: RebuildTicket) -> Result<RebuildOutcome> {
        let RebuildTicket {
            volume,
            scope,
            token,
        } = ticket;

        if let Err(error) = std::fs::symlink_metadata(&scope.root) {
            let error = SearchError::stat(scope.root.clone(), error);
            self.finish_build(volume, token.version(), Some(error.to_string()));
            return Err(error);
        }

        let walk_data = WalkData::new(&scope)
            .with_cancel(token.clone())
            .with_progress(&self.progress);
        let Some(walked) = walk_volume(&walk_data) else {
            log::info!("index rebuild cancelled volume={volume}");
            return Err(SearchError::ScanCancelled(volume));
        };

        let mut writer = self.writer.lock();
        if token.cancelled() {
            log::info!("index rebuild superseded volume={volume}");
            return Err(SearchError::ScanCancelled(volume));
        }

        let mut index = index_from_walk(walked, &scope, &mut writer.next_seq);
        let queued = writer.pending.remove(&volume).unwrap_or_default();
        let mut rescan_requested = false;
        for event in &queued {
            match &event.kind {
                VolumeEventKind::Overflow | VolumeEventKind::Mounted => rescan_requested = true,
                VolumeEventKind::Unmounted => index = VolumeIndex::new(),
                _ => {
                    for path in event.paths() {
                        apply_path_change(&mut index, &scope, path, &mut writer.next_seq);
                    }
                }
            }
        }
        let entries = index.len();

        let mut next = self.snapshot().successor();
        next.replace_volume(volume, index);
        self.publish(next);
        drop(writer);

        self.finish_build(volume, token.version(), None);
        log::info!(
            "index rebuild finished volume={volume} entries={entries} replayed={}",
            queued.len()
        );
        Ok(RebuildOutcome {
            entries,
            rescan_requested,
        })
    }

    /// Begins and runs a rebuild on the calling thread.
    pub fn rebuild_volume(&self, volume: VolumeId) -> Result<RebuildOutcome> {
        let ticket = self.begin_rebuild(volume)?;
        self.run_rebuild(ticket)
    }

    /// Cancels the rebuild of `volume`, dropping its queued events.
    pub fn cancel_rebuild(&self, volume: VolumeId) {
        let mut writer = self.writer.lock();
        writer.pending.remove(&volume);
        let mut builds = self.builds.lock();
        if let Some(slot) = builds.get_mut(&volume) {
            if slot.active.take().is_some() {
                slot.tracker.cancel();
                log::info!("index rebuild cancel requested volume={volume}");
            }
        }
        let any_active = builds.values().any(|slot| slot.active.is_some());
        drop(builds);
        if !any_active && self.is_indexing() {
            self.set_state(IndexBuildState::Ready);
        }
    }

    /// Drops every entry of `volume` from the index.
    pub fn remove_volume(&self, volume: VolumeId) {
        self.cancel_rebuild(volume);
        let _writer = self.writer.lock();
        let current = self.snapshot();
        if current.volume(volume).is_none() {
            return;
        }
        let mut next = current.successor();
        next.remove_volume(volume);
        self.publish(next);
        log::info!("volume removed from index volume={volume}");
    }

    /// Hands the subtree under a newly registered mount over to `volume`:
    /// enclosing volumes drop what they indexed below it. Returns how many
    /// entries were dropped.
    pub fn claim_mount(&self, volume: VolumeId) -> usize {
        let Some(mount) = self
            .volumes
            .read()
            .get(volume)
            .map(|entry| entry.mount_path.clone())
        else {
            return 0;
        };

        let _writer = self.writer.lock();
        let current = self.snapshot();
        let owners: Vec<VolumeId> = current
            .volume_ids()
            .filter(|id| *id != volume)
            .filter(|id| {
                current
                    .volume(*id)
                    .is_some_and(|index| index.get(&mount).is_some())
            })
            .collect();
        if owners.is_empty() {
            return 0;
        }

        let mut next = current.successor();
        let dropped: usize = owners
            .iter()
            .map(|owner| next.volume_mut(*owner).remove_subtree(&mount))
            .sum();
        self.publish(next);
        log::info!(
            "mount claimed volume={volume} from={owners:?} dropped={dropped}"
        );
        dropped
    }

    pub fn apply_event(&self, event: VolumeEvent) -> BatchOutcome {
        self.apply_batch(vec![event])
    }

    /// Applies a batch of events in order and publishes one snapshot for it.
    pub fn apply_batch(&self, events: Vec<VolumeEvent>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if events.is_empty() {
            return outcome;
        }

        let mut writer = self.writer.lock();
        let writer = &mut *writer;
        let table = self.volumes.read();
        let mut scopes: FnvHashMap<VolumeId, Option<ScanScope>> = FnvHashMap::default();
        let mut rebuild = FnvHashSet::default();
        let mut unmounted = FnvHashSet::default();
        let mut next: Option<IndexSnapshot> = None;

        for event in events {
            if let Some(queue) = writer.pending.get_mut(&event.volume) {
                enqueue_pending(queue, event);
                continue;
            }

            match &event.kind {
                VolumeEventKind::Overflow => {
                    log::warn!("{}, rebuilding", SearchError::EventOverflow(event.volume));
                    rebuild.insert(event.volume);
                }
                VolumeEventKind::Mounted => {
                    rebuild.insert(event.volume);
                }
                VolumeEventKind::Unmounted => {
                    unmounted.insert(event.volume);
                    let next = next.get_or_insert_with(|| self.snapshot().successor());
                    next.remove_volume(event.volume);
                }
                _ => {
                    for path in event.paths() {
                        // Overlapping mounts: the deepest enabled volume owns the path.
                        let Some(owner) = table.owner_of(path) else {
                            continue;
                        };
                        if let Some(queue) = writer.pending.get_mut(&owner) {
                            enqueue_pending(queue, VolumeEvent::modified(owner, path));
                            continue;
                        }
                        let scope = scopes.entry(owner).or_insert_with(|| {
                            ScanScope::for_volume(&table, owner, &self.rules)
                        });
                        let Some(scope) = scope.as_ref() else {
                            continue;
                        };
                        let next = next.get_or_insert_with(|| self.snapshot().successor());
                        let index = next.volume_mut(owner);
                        if apply_path_change(index, scope, path, &mut writer.next_seq)
                            == ApplyOutcome::RootMissing
                        {
                            unmounted.insert(owner);
                            next.remove_volume(owner);
                        }
                    }
                }
            }
        }
        drop(table);

        if let Some(next) = next {
            self.publish(next);
            outcome.changed = true;
        }
        outcome.rebuild = sorted(rebuild);
        outcome.unmounted = sorted(unmounted);
        if !outcome.rebuild.is_empty() || !outcome.unmounted.is_empty() {
            log::info!(
                "event batch needs attention rebuild={:?} unmounted={:?}",
                outcome.rebuild,
                outcome.unmounted
            );
        }
        outcome
    }

    /// Looks up the volume owning `path`.
    pub fn owner_of(&self, path: &Path) -> Option<VolumeId> {
        self.volumes.read().owner_of(path)
    }

    fn publish(&self, next: IndexSnapshot) {
        let version = next.version();
        *self.current.write() = Arc::new(next);
        self.version_tx.send_replace(version);
    }

    fn finish_build(&self, volume: VolumeId, version: u64, error: Option<String>) {
        let mut builds = self.builds.lock();
        if let Some(slot) = builds.get_mut(&volume) {
            if slot.active == Some(version) {
                slot.active = None;
            }
        }
        let any_active = builds.values().any(|slot| slot.active.is_some());
        drop(builds);

        if let Some(message) = &error {
            log::warn!("index rebuild failed volume={volume} error={message}");
            self.writer.lock().pending.remove(&volume);
        }
        *self.last_error.lock() = error.clone();

        if !any_active {
            self.progress.mark_finished();
            self.set_state(if error.is_some() {
                IndexBuildState::Error
            } else {
                IndexBuildState::Ready
            });
        }
    }

    fn set_state(&self, state: IndexBuildState) {
        self.build_state.store(state as u8, Ordering::Relaxed);
    }
}

fn enqueue_pending(queue: &mut Vec<VolumeEvent>, event: VolumeEvent) {
    if matches!(queue.as_slice(), [only] if only.kind == VolumeEventKind::Overflow) {
        return;
    }
    if queue.len() >= MAX_PENDING_EVENTS {
        let volume = event.volume;
        log::warn!(
            "{}, pending queue collapsed",
            SearchError::EventOverflow(volume)
        );
        queue.clear();
        queue.push(VolumeEvent::new(volume, VolumeEventKind::Overflow));
        return;
    }
    queue.push(event);
}

fn sorted(set: FnvHashSet<VolumeId>) -> Vec<VolumeId> {
    let mut values: Vec<VolumeId> = set.into_iter().collect();
    values.sort();
    values
}
