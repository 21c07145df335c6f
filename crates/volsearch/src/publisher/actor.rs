//! The publisher actor: the only writer of observable state.
//!
//! Commands arrive over an unbounded channel. Index and attribute changes are
//! observed through their `watch` channels. Every recomputation runs on the
//! blocking pool under a fresh generation; a completion is published only if
//! its generation is still the latest, so an older, slower computation never
//! overwrites a newer one. Once results have been held back for longer than
//! the configured maximum latency, new changes wait for the computation in
//! flight to publish instead of cancelling it.

use std::sync::Arc;

use bitflags::bitflags;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::store::{Bus, PublishedState, ResultList, SearchEvent};
use super::view::{compute_recents, compute_results, QueryState, ViewLimits};
use crate::attributes::AttributeCache;
use crate::cancel::GenerationTracker;
use crate::config::QueryConfig;
use crate::filter::{FilterShortcut, FolderFilter, QuickFilter, VolumeFilter};
use crate::indexer::Indexer;
use crate::sort::SortField;
use crate::types::{ScoredResult, VolumeId};

#[derive(Debug)]
pub enum ContextCommand {
    SetQuery(String),
    /// Header click: flips the active field or switches to a new one.
    SelectSortField(SortField),
    SetSortField(SortField),
    SetReverseSort(bool),
    SetFolderFilter(Option<FolderFilter>),
    SetQuickFilter(Option<QuickFilter>),
    SetVolumeFilter(VolumeFilter),
    ClearFilters,
    /// Replies whether the shortcut selected or cleared anything.
    ApplyShortcut {
        shortcut: FilterShortcut,
        reply: oneshot::Sender<bool>,
    },
    SetSuspended(bool),
    SetIndexing { indexing: bool, operation: String },
    SetFullDiskAccess(bool),
    SetEnabledVolumes(Vec<VolumeId>),
    Reload,
    Shutdown,
}

bitflags! {
    /// Inputs changed since the last scheduled computation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Dirty: u8 {
        const QUERY = 1 << 0;
        const FILTERS = 1 << 1;
        const SORT = 1 << 2;
        const INDEX = 1 << 3;
        const ATTRIBUTES = 1 << 4;
        const RELOAD = 1 << 5;
    }
}

#[derive(Debug)]
struct Computed {
    generation: u64,
    snapshot_version: u64,
    recents: Option<Vec<ScoredResult>>,
    results: Vec<ScoredResult>,
}

pub(crate) struct PublisherActor {
    state: QueryState,
    published: Arc<PublishedState>,
    bus: Bus,
    indexer: Arc<Indexer>,
    cache: AttributeCache,
    config: QueryConfig,
    folder_filters: Vec<FolderFilter>,
    quick_filters: Vec<QuickFilter>,
    suspended_tx: watch::Sender<bool>,
    commands: mpsc::UnboundedReceiver<ContextCommand>,
    computed_tx: mpsc::UnboundedSender<Computed>,
    computed_rx: mpsc::UnboundedReceiver<Computed>,
    tracker: GenerationTracker,
    latest: u64,
    dirty: Dirty,
    debounce_until: Option<Instant>,
    /// Whether the latest generation is still computing.
    in_flight: bool,
    /// When the oldest unpublished computation was scheduled.
    stale_since: Option<Instant>,
    recents: ResultList,
    recents_version: Option<u64>,
}

impl PublisherActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        published: Arc<PublishedState>,
        bus: Bus,
        indexer: Arc<Indexer>,
        cache: AttributeCache,
        config: QueryConfig,
        folder_filters: Vec<FolderFilter>,
        quick_filters: Vec<QuickFilter>,
        suspended_tx: watch::Sender<bool>,
        commands: mpsc::UnboundedReceiver<ContextCommand>,
    ) -> Self {
        let (computed_tx, computed_rx) = mpsc::unbounded_channel();
        Self {
            state: published.query.get(),
            published,
            bus,
            indexer,
            cache,
            config,
            folder_filters,
            quick_filters,
            suspended_tx,
            commands,
            computed_tx,
            computed_rx,
            tracker: GenerationTracker::new(),
            latest: 0,
            dirty: Dirty::empty(),
            debounce_until: None,
            in_flight: false,
            stale_since: None,
            recents: Arc::new(Vec::new()),
            recents_version: None,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut index_rx = self.indexer.subscribe();
        let mut attributes_rx = self.cache.subscribe();
        self.mark(Dirty::INDEX);

        loop {
            let debounce = self.debounce_until;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ContextCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(computed) = self.computed_rx.recv() => self.finish(computed),
                Ok(()) = index_rx.changed() => self.mark(Dirty::INDEX),
                Ok(()) = attributes_rx.changed() => self.mark(Dirty::ATTRIBUTES),
                _ = sleep_until(debounce.unwrap_or_else(Instant::now)), if debounce.is_some() => {
                    self.debounce_until = None;
                    self.schedule();
                }
            }
        }

        self.tracker.cancel();
        log::info!("results publisher stopped");
    }

    fn handle(&mut self, command: ContextCommand) {
        match command {
            ContextCommand::SetQuery(query) => {
                if self.state.query != query {
                    self.state.query = query;
                    self.mark(Dirty::QUERY);
                }
            }
            ContextCommand::SelectSortField(field) => {
                self.state.sort.select(field);
                self.mark(Dirty::SORT);
            }
            ContextCommand::SetSortField(field) => {
                if self.state.sort.field != field {
                    self.state.sort.field = field;
                    self.mark(Dirty::SORT);
                }
            }
            ContextCommand::SetReverseSort(reverse) => {
                if self.state.sort.reverse != reverse {
                    self.state.sort.reverse = reverse;
                    self.mark(Dirty::SORT);
                }
            }
            ContextCommand::SetFolderFilter(folder) => {
                self.state.filters.folder = folder;
                self.mark(Dirty::FILTERS);
            }
            ContextCommand::SetQuickFilter(quick) => {
                self.state.filters.quick = quick;
                self.mark(Dirty::FILTERS);
            }
            ContextCommand::SetVolumeFilter(volume) => {
                self.state.filters.volume = volume;
                self.mark(Dirty::FILTERS);
            }
            ContextCommand::ClearFilters => {
                self.state.filters.clear_all();
                self.mark(Dirty::FILTERS);
            }
            ContextCommand::ApplyShortcut { shortcut, reply } => {
                let enabled = self.published.enabled_volumes.get();
                let handled = self.state.filters.apply_shortcut(
                    shortcut,
                    &self.folder_filters,
                    &self.quick_filters,
                    &enabled,
                );
                if handled {
                    self.mark(Dirty::FILTERS);
                }
                let _ = reply.send(handled);
            }
            ContextCommand::SetSuspended(suspended) => {
                self.state.suspended = suspended;
                self.suspended_tx.send_replace(suspended);
                self.published.query.set(self.state.clone());
            }
            ContextCommand::SetIndexing {
                indexing,
                operation,
            } => {
                if self.published.indexing.set(indexing) {
                    let _ = self.bus.publish(SearchEvent::IndexingChanged(indexing));
                }
                if self.published.operation.set(operation.clone()) {
                    let _ = self.bus.publish(SearchEvent::OperationChanged(operation));
                }
            }
            ContextCommand::SetFullDiskAccess(granted) => {
                if self.published.has_full_disk_access.set(granted) {
                    let _ = self
                        .bus
                        .publish(SearchEvent::FullDiskAccessChanged(granted));
                }
            }
            ContextCommand::SetEnabledVolumes(volumes) => {
                if self.published.enabled_volumes.set(volumes.clone()) {
                    let _ = self
                        .bus
                        .publish(SearchEvent::EnabledVolumesChanged(volumes));
                }
                // A volume filter on a disabled volume matches nothing.
                self.mark(Dirty::FILTERS);
            }
            ContextCommand::Reload => self.mark(Dirty::RELOAD),
            ContextCommand::Shutdown => {}
        }
    }

    /// Records a change and schedules a computation, debouncing typing on
    /// large indexes.
    fn mark(&mut self, dirty: Dirty) {
        self.dirty |= dirty;
        if dirty.intersects(Dirty::QUERY | Dirty::FILTERS | Dirty::SORT) {
            self.published.query.set(self.state.clone());
        }

        if dirty == Dirty::QUERY
            && self.indexer.snapshot().len() >= self.config.debounce_min_entries
        {
            self.debounce_until = Some(Instant::now() + self.config.debounce());
            return;
        }
        self.debounce_until = None;
        self.schedule();
    }

    fn schedule(&mut self) {
        let overdue = self
            .stale_since
            .is_some_and(|since| since.elapsed() >= self.config.max_latency());
        if self.in_flight && overdue {
            log::debug!(
                "results recompute deferred until generation={} publishes",
                self.latest
            );
            return;
        }

        let dirty = std::mem::replace(&mut self.dirty, Dirty::empty());
        let token = self.tracker.begin();
        let generation = token.version();
        self.latest = generation;
        self.in_flight = true;
        self.stale_since.get_or_insert_with(Instant::now);

        let snapshot = self.indexer.snapshot();
        let recents_stale = self.recents_version != Some(snapshot.version());
        let known_recents = self.recents.clone();
        let state = self.state.clone();
        let cache = self.cache.clone();
        let limits = ViewLimits {
            max_results: self.config.max_results,
        };
        let max_recents = self.config.max_recents;
        let computed_tx = self.computed_tx.clone();
        log::debug!("results recompute scheduled generation={generation} dirty={dirty:?}");

        tokio::task::spawn_blocking(move || {
            let recents = recents_stale.then(|| compute_recents(&snapshot, max_recents));
            let current = recents.as_deref().unwrap_or(known_recents.as_slice());
            let Some(results) =
                compute_results(&snapshot, current, &state, &cache, limits, &token)
            else {
                log::debug!("results recompute cancelled generation={generation}");
                return;
            };
            let _ = computed_tx.send(Computed {
                generation,
                snapshot_version: snapshot.version(),
                recents,
                results,
            });
        });
    }

    fn finish(&mut self, computed: Computed) {
        if computed.generation != self.latest {
            log::debug!(
                "discarding stale results generation={} latest={}",
                computed.generation,
                self.latest
            );
            return;
        }
        self.in_flight = false;
        self.stale_since = None;

        if let Some(recents) = computed.recents {
            let count = recents.len();
            self.recents = Arc::new(recents);
            self.recents_version = Some(computed.snapshot_version);
            self.published.recents.replace(self.recents.clone());
            let _ = self.bus.publish(SearchEvent::RecentsUpdated { count });
        }

        let count = computed.results.len();
        self.published.results.replace(Arc::new(computed.results));
        let _ = self.bus.publish(SearchEvent::ResultsUpdated {
            generation: computed.generation,
            count,
        });

        // Changes deferred while this generation computed.
        if !self.dirty.is_empty() && self.debounce_until.is_none() {
            self.schedule();
        }
    }
}
