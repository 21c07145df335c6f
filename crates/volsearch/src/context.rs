//! The search context: one object wiring watcher, indexer, attribute cache
//! and publisher together for a front-end.
//!
//! [`SearchContext::new`] spawns the publisher actor, so query and filter
//! setters work immediately. [`SearchContext::start`] waits for full disk
//! access, registers the volume watches and indexes every enabled volume.
//! Both `start` and [`SearchContext::cleanup`] are idempotent.
//!
//! While running, the volumes directory is polled: new mount points are
//! registered as external volumes and indexed, vanished ones are dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attributes::{AttributeCache, AttributeEntry, AttributeFetcher, FsFetcher};
use crate::config::SearchConfig;
use crate::error::{canonicalize_existing_path, Result, SearchError};
use crate::filter::{FilterShortcut, FolderFilter, QuickFilter, VolumeFilter};
use crate::indexer::{IndexRules, IndexSnapshot, Indexer, RebuildOutcome};
use crate::open_with::OpenWithTable;
use crate::publisher::{
    Bus, ContextCommand, PublishedState, PublisherActor, QueryState, ResultList, SearchEvent,
};
use crate::sort::SortField;
use crate::types::{EntryKind, IndexStatus, Volume, VolumeId};
use crate::volumes::{check_full_disk_access, discover_volumes, list_mounts, VolumeTable};
use crate::watcher::{
    spawn_event_pump, EventBatch, NotifyBackend, VolumeEvent, VolumeEventKind, VolumeWatcher,
    WatchBackend,
};

/// Where removable volumes are mounted when none are configured.
const DEFAULT_VOLUMES_DIR: &str = "/Volumes";
const EVENT_BUS_CAPACITY: usize = 256;
/// Refresh cadence of the indexing progress line.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct RebuildDone {
    volume: VolumeId,
    result: Result<RebuildOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Created,
    Running,
    Stopped,
}

/// Receivers consumed by `start`.
struct Pending {
    events: mpsc::UnboundedReceiver<VolumeEvent>,
    suspended: watch::Receiver<bool>,
    rebuilds: mpsc::UnboundedReceiver<RebuildDone>,
}

struct Lifecycle {
    state: RunState,
    pending: Option<Pending>,
    tasks: Vec<JoinHandle<()>>,
}

struct ContextShared {
    config: SearchConfig,
    /// Polled for mounts coming and going.
    mount_dir: Option<PathBuf>,
    volumes: Arc<RwLock<VolumeTable>>,
    indexer: Arc<Indexer>,
    watcher: VolumeWatcher,
    commands: mpsc::UnboundedSender<ContextCommand>,
    bus: Bus,
    rebuild_tx: mpsc::UnboundedSender<RebuildDone>,
    shutdown: CancellationToken,
    runtime: Handle,
}

pub struct SearchContext {
    shared: Arc<ContextShared>,
    cache: AttributeCache,
    published: Arc<PublishedState>,
    open_with: OpenWithTable,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("volumes", &self.shared.volumes.read().len())
            .field("state", &self.lifecycle.lock().state)
            .finish()
    }
}

impl SearchContext {
    /// Creates a context backed by `notify` and the filesystem. Must be called
    /// within a tokio runtime.
    pub fn new(config: SearchConfig) -> Result<Self> {
        Self::with_backends(config, Arc::new(NotifyBackend), Arc::new(FsFetcher))
    }

    pub fn with_backends(
        config: SearchConfig,
        watch_backend: Arc<dyn WatchBackend>,
        fetcher: Arc<dyn AttributeFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            SearchError::Internal("search context requires a tokio runtime".to_string())
        })?;

        let mount_dir = config.volumes_dir.clone().or_else(|| {
            config
                .volumes
                .is_empty()
                .then(|| PathBuf::from(DEFAULT_VOLUMES_DIR))
        });
        let declared = match &mount_dir {
            Some(dir) if config.volumes.is_empty() => discover_volumes(dir),
            _ => config.volumes.clone(),
        };
        let volumes = Arc::new(RwLock::new(VolumeTable::from_config(&declared)?));
        let rules = IndexRules {
            ignored_roots: config
                .ignored_paths
                .iter()
                .cloned()
                .map(canonicalize_existing_path)
                .collect(),
            include_hidden: config.include_hidden,
        };
        let indexer = Arc::new(Indexer::new(volumes.clone(), rules));
        let cache = AttributeCache::new(fetcher, volumes.clone());
        let (watcher, events) = VolumeWatcher::new(watch_backend, config.watch.clone());
        let published = Arc::new(PublishedState::new(QueryState::default()));
        let bus = Bus::new(EVENT_BUS_CAPACITY);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (suspended_tx, suspended) = watch::channel(false);
        let (rebuild_tx, rebuilds) = mpsc::unbounded_channel();

        {
            let _guard = runtime.enter();
            PublisherActor::new(
                published.clone(),
                bus.clone(),
                indexer.clone(),
                cache.clone(),
                config.query.clone(),
                config.folder_filters.clone(),
                config.quick_filters.clone(),
                suspended_tx,
                commands_rx,
            )
            .spawn();
        }

        let shared = Arc::new(ContextShared {
            config,
            mount_dir,
            volumes,
            indexer,
            watcher,
            commands,
            bus,
            rebuild_tx,
            shutdown: CancellationToken::new(),
            runtime,
        });
        shared.publish_enabled_volumes();

        let open_with = OpenWithTable::new(shared.config.open_with.clone());
        Ok(Self {
            shared,
            cache,
            published,
            open_with,
            lifecycle: Mutex::new(Lifecycle {
                state: RunState::Created,
                pending: Some(Pending {
                    events,
                    suspended,
                    rebuilds,
                }),
                tasks: Vec::new(),
            }),
        })
    }

    /// Starts watching and indexing. Calling it again is a no-op; calling it
    /// after [`Self::cleanup`] is an error.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            RunState::Running => return Ok(()),
            RunState::Stopped => {
                return Err(SearchError::InvalidInput(
                    "search context was cleaned up".to_string(),
                ))
            }
            RunState::Created => {}
        }
        let pending = lifecycle
            .pending
            .take()
            .ok_or_else(|| SearchError::Internal("search context channels missing".to_string()))?;
        lifecycle.state = RunState::Running;

        let _guard = self.shared.runtime.enter();
        let (batch_tx, batches) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(
            pending.events,
            batch_tx,
            self.shared.config.watch.clone(),
            pending.suspended,
            self.shared.shutdown.clone(),
        );
        let indexing = tokio::spawn(
            self.shared
                .clone()
                .run_indexing(batches, pending.rebuilds),
        );
        lifecycle.tasks.extend([pump, indexing]);

        log::info!(
            "search context started volumes={}",
            self.shared.volumes.read().len()
        );
        Ok(())
    }

    /// Stops watching, cancels rebuilds and fetches, and stops publishing.
    pub fn cleanup(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == RunState::Stopped {
            return;
        }
        lifecycle.state = RunState::Stopped;
        lifecycle.pending = None;

        self.shared.shutdown.cancel();
        self.shared.watcher.unregister_all();
        for volume in self.shared.indexer.indexing_volumes() {
            self.shared.indexer.cancel_rebuild(volume);
        }
        self.cache.cancel_all();
        self.shared.send(ContextCommand::Shutdown);
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }
        log::info!("search context cleaned up");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().state == RunState::Running
    }

    // Query state.

    pub fn query_state(&self) -> watch::Receiver<QueryState> {
        self.published.query.subscribe()
    }

    pub fn query(&self) -> String {
        self.published.query.get().query
    }

    pub fn set_query(&self, query: impl Into<String>) {
        self.shared.send(ContextCommand::SetQuery(query.into()));
    }

    pub fn sort_field(&self) -> SortField {
        self.published.query.get().sort.field
    }

    pub fn set_sort_field(&self, field: SortField) {
        self.shared.send(ContextCommand::SetSortField(field));
    }

    /// Header click semantics: flips the active field, resets a new one.
    pub fn select_sort_field(&self, field: SortField) {
        self.shared.send(ContextCommand::SelectSortField(field));
    }

    pub fn reverse_sort(&self) -> bool {
        self.published.query.get().sort.reverse
    }

    pub fn set_reverse_sort(&self, reverse: bool) {
        self.shared.send(ContextCommand::SetReverseSort(reverse));
    }

    pub fn folder_filter(&self) -> Option<FolderFilter> {
        self.published.query.get().filters.folder
    }

    pub fn set_folder_filter(&self, filter: Option<FolderFilter>) {
        self.shared.send(ContextCommand::SetFolderFilter(filter));
    }

    pub fn quick_filter(&self) -> Option<QuickFilter> {
        self.published.query.get().filters.quick
    }

    pub fn set_quick_filter(&self, filter: Option<QuickFilter>) {
        self.shared.send(ContextCommand::SetQuickFilter(filter));
    }

    pub fn volume_filter(&self) -> VolumeFilter {
        self.published.query.get().filters.volume
    }

    pub fn set_volume_filter(&self, filter: VolumeFilter) {
        self.shared.send(ContextCommand::SetVolumeFilter(filter));
    }

    pub fn suspended(&self) -> bool {
        self.published.query.get().suspended
    }

    /// While suspended, watcher batches flush on the slow cadence.
    pub fn set_suspended(&self, suspended: bool) {
        self.shared.send(ContextCommand::SetSuspended(suspended));
    }

    pub fn clear_filters(&self) {
        self.shared.send(ContextCommand::ClearFilters);
    }

    /// Applies a filter shortcut after every command sent before it.
    /// Returns whether it selected or cleared anything.
    pub async fn apply_shortcut(&self, shortcut: FilterShortcut) -> Result<bool> {
        let (reply, handled) = oneshot::channel();
        self.shared
            .commands
            .send(ContextCommand::ApplyShortcut { shortcut, reply })
            .map_err(|_| SearchError::Internal("results publisher stopped".to_string()))?;
        handled
            .await
            .map_err(|_| SearchError::Internal("results publisher dropped response".to_string()))
    }

    pub fn folder_filters(&self) -> &[FolderFilter] {
        &self.shared.config.folder_filters
    }

    pub fn quick_filters(&self) -> &[QuickFilter] {
        &self.shared.config.quick_filters
    }

    // Observable views.

    pub fn results(&self) -> watch::Receiver<ResultList> {
        self.published.results.subscribe()
    }

    pub fn current_results(&self) -> ResultList {
        self.published.results.get()
    }

    pub fn recents(&self) -> watch::Receiver<ResultList> {
        self.published.recents.subscribe()
    }

    pub fn indexing(&self) -> watch::Receiver<bool> {
        self.published.indexing.subscribe()
    }

    pub fn operation(&self) -> watch::Receiver<String> {
        self.published.operation.subscribe()
    }

    pub fn has_full_disk_access(&self) -> watch::Receiver<bool> {
        self.published.has_full_disk_access.subscribe()
    }

    pub fn enabled_volumes(&self) -> watch::Receiver<Vec<VolumeId>> {
        self.published.enabled_volumes.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SearchEvent> {
        self.shared.bus.subscribe()
    }

    /// Forces a recomputation of the results view.
    pub fn reload_results(&self) {
        self.shared.send(ContextCommand::Reload);
    }

    // Index and volumes.

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.shared.indexer.snapshot()
    }

    pub fn status(&self) -> IndexStatus {
        self.shared.indexer.status()
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.shared.indexer
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.shared.volumes.read().iter().cloned().collect()
    }

    /// Rebuilds every enabled volume.
    pub fn rescan(&self) -> Result<()> {
        self.ensure_running()?;
        let enabled: Vec<VolumeId> = self
            .shared
            .volumes
            .read()
            .enabled()
            .map(|volume| volume.id)
            .collect();
        log::info!("rescan requested volumes={}", enabled.len());
        for volume in enabled {
            self.shared.spawn_rebuild(volume);
        }
        Ok(())
    }

    /// Enables or disables a volume. Disabling cancels its rebuild, drops
    /// its watch and removes its entries; enabling watches and indexes it.
    pub fn set_volume_enabled(&self, volume: VolumeId, enabled: bool) -> Result<()> {
        if !self.shared.volumes.write().set_enabled(volume, enabled)? {
            return Ok(());
        }
        log::info!("volume toggled volume={volume} enabled={enabled}");
        self.shared.publish_enabled_volumes();

        if !enabled {
            self.shared.watcher.unregister(volume);
            self.shared.indexer.remove_volume(volume);
            self.shared.report_indexing();
            return Ok(());
        }
        if self.is_running() {
            let _guard = self.shared.runtime.enter();
            self.shared.watch_volume(volume);
            self.shared.spawn_rebuild(volume);
        }
        Ok(())
    }

    // Rows.

    /// Attributes for rendering `path`, fetched in the background on
    /// external volumes.
    pub fn attributes(&self, path: &Path) -> AttributeEntry {
        let _guard = self.shared.runtime.enter();
        self.cache.request(path, self.kind_of(path), false)
    }

    /// Like [`Self::attributes`] but always refetches.
    pub fn attributes_forced(&self, path: &Path) -> AttributeEntry {
        let _guard = self.shared.runtime.enter();
        self.cache.request(path, self.kind_of(path), true)
    }

    pub fn compute_open_with_apps(&self, paths: &[PathBuf]) -> BTreeMap<PathBuf, char> {
        self.open_with.compute_open_with_apps(paths)
    }

    fn kind_of(&self, path: &Path) -> EntryKind {
        self.shared
            .indexer
            .snapshot()
            .get(path)
            .map(|entry| entry.kind)
            .unwrap_or(EntryKind::File)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SearchError::InvalidInput(
                "search context is not running".to_string(),
            ))
        }
    }
}

impl Drop for SearchContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl ContextShared {
    fn send(&self, command: ContextCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("results publisher is gone, command dropped");
        }
    }

    fn publish_enabled_volumes(&self) {
        let enabled = self
            .volumes
            .read()
            .enabled()
            .map(|volume| volume.id)
            .collect();
        self.send(ContextCommand::SetEnabledVolumes(enabled));
    }

    async fn run_indexing(
        self: Arc<Self>,
        mut batches: mpsc::UnboundedReceiver<EventBatch>,
        mut rebuilds: mpsc::UnboundedReceiver<RebuildDone>,
    ) {
        if !self.wait_for_full_disk_access().await {
            return;
        }

        let enabled: Vec<VolumeId> = self
            .volumes
            .read()
            .enabled()
            .map(|volume| volume.id)
            .collect();
        for volume in &enabled {
            self.watch_volume(*volume);
        }
        for volume in enabled {
            self.spawn_rebuild(volume);
        }

        let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
        let mut mount_poll = tokio::time::interval(self.config.mount_poll());
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => self.handle_batch(batch),
                    None => break,
                },
                Some(done) = rebuilds.recv() => self.handle_rebuild(done),
                _ = progress.tick() => {
                    if self.indexer.is_indexing() {
                        self.report_indexing();
                    }
                }
                _ = mount_poll.tick(), if self.mount_dir.is_some() => self.reconcile_mounts(),
            }
        }
        log::info!("indexing loop stopped");
    }

    /// Polls the check path until access is granted. `false` on shutdown.
    async fn wait_for_full_disk_access(&self) -> bool {
        let check_path = self.config.full_disk_access_path.clone();
        loop {
            let granted = check_full_disk_access(check_path.as_deref());
            self.send(ContextCommand::SetFullDiskAccess(granted));
            if granted {
                return true;
            }
            log::info!("waiting for full disk access");
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.config.full_disk_access_poll()) => {}
            }
        }
    }

    /// Registers the watch of `volume`. Failures are retried by the watcher.
    fn watch_volume(&self, volume: VolumeId) {
        let Some(entry) = self.volumes.read().get(volume).cloned() else {
            return;
        };
        if let Err(error) = self.watcher.register(&entry) {
            let _ = self.bus.publish(SearchEvent::WatchFailed {
                volume,
                root: entry.mount_path.clone(),
                message: error.to_string(),
            });
        }
    }

    fn spawn_rebuild(&self, volume: VolumeId) {
        let ticket = match self.indexer.begin_rebuild(volume) {
            Ok(ticket) => ticket,
            Err(error) => {
                log::warn!("rebuild not started volume={volume} error={error}");
                let _ = self.bus.publish(SearchEvent::RebuildFailed {
                    volume,
                    message: error.to_string(),
                });
                return;
            }
        };
        self.report_indexing();

        let indexer = self.indexer.clone();
        let done = self.rebuild_tx.clone();
        self.runtime.spawn_blocking(move || {
            let result = indexer.run_rebuild(ticket);
            let _ = done.send(RebuildDone { volume, result });
        });
    }

    fn handle_rebuild(&self, done: RebuildDone) {
        let RebuildDone { volume, result } = done;
        match result {
            Ok(RebuildOutcome {
                entries,
                rescan_requested,
            }) => {
                let _ = self
                    .bus
                    .publish(SearchEvent::RebuildFinished { volume, entries });
                if rescan_requested && self.is_enabled(volume) {
                    log::info!("queued overflow forces another rebuild volume={volume}");
                    self.spawn_rebuild(volume);
                }
            }
            Err(error) if error.is_cancelled() => {
                log::debug!("rebuild result dropped volume={volume}");
            }
            Err(error) => {
                let _ = self.bus.publish(SearchEvent::RebuildFailed {
                    volume,
                    message: error.to_string(),
                });
            }
        }
        self.report_indexing();
    }

    fn handle_batch(&self, batch: EventBatch) {
        let outcome = self.indexer.apply_batch(batch);
        for volume in outcome.rebuild {
            if self.is_enabled(volume) {
                self.spawn_rebuild(volume);
            }
        }
        for volume in outcome.unmounted {
            log::info!("volume unmounted volume={volume}");
            // Re-registering retries until the volume is mounted again, then
            // reports an overflow that triggers a rebuild.
            if self.is_enabled(volume) {
                self.watch_volume(volume);
            }
        }
    }

    /// Registers mounts that appeared under the volumes directory and drops
    /// the volumes whose mount point is gone.
    fn reconcile_mounts(&self) {
        let Some(dir) = &self.mount_dir else {
            return;
        };
        let dir = canonicalize_existing_path(dir.clone());
        let mounts = list_mounts(&dir);
        let known: Vec<(VolumeId, PathBuf)> = self
            .volumes
            .read()
            .iter()
            .filter(|volume| !volume.internal && volume.mount_path.parent() == Some(dir.as_path()))
            .map(|volume| (volume.id, volume.mount_path.clone()))
            .collect();

        for (volume, mount_path) in &known {
            if mounts.contains(mount_path) {
                continue;
            }
            log::info!(
                "mount point vanished volume={volume} path={}",
                mount_path.display()
            );
            self.watcher.unregister(*volume);
            self.indexer.cancel_rebuild(*volume);
            self.volumes.write().remove(*volume);
            self.publish_enabled_volumes();
            self.emit(VolumeEvent::new(*volume, VolumeEventKind::Unmounted));
        }

        for mount_path in mounts {
            if known.iter().any(|(_, known)| *known == mount_path) {
                continue;
            }
            let registered = self.volumes.write().register(mount_path.clone(), false, true);
            let volume = match registered {
                Ok(volume) => volume,
                // Already declared, e.g. as an internal volume.
                Err(error) => {
                    log::debug!("mount point skipped path={} error={error}", mount_path.display());
                    continue;
                }
            };
            log::info!(
                "mount point appeared volume={volume} path={}",
                mount_path.display()
            );
            self.publish_enabled_volumes();
            self.indexer.claim_mount(volume);
            self.watch_volume(volume);
            self.emit(VolumeEvent::new(volume, VolumeEventKind::Mounted));
        }
    }

    fn emit(&self, event: VolumeEvent) {
        if self.watcher.sender().send(event).is_err() {
            log::debug!("event pump is gone, mount event dropped");
        }
    }

    fn is_enabled(&self, volume: VolumeId) -> bool {
        self.volumes
            .read()
            .get(volume)
            .is_some_and(|entry| entry.enabled)
    }

    fn report_indexing(&self) {
        let building = self.indexer.indexing_volumes();
        if building.is_empty() {
            self.send(ContextCommand::SetIndexing {
                indexing: false,
                operation: String::new(),
            });
            return;
        }
        let names: Vec<String> = {
            let table = self.volumes.read();
            building
                .iter()
                .filter_map(|volume| table.get(*volume).map(|entry| entry.name.clone()))
                .collect()
        };
        self.send(ContextCommand::SetIndexing {
            indexing: true,
            operation: self.indexer.progress().describe(&names.join(", ")),
        });
    }
}
