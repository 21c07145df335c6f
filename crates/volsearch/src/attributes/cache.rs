//! Attribute cache with at most one fetch in flight per path.
//!
//! Every fetch is stamped with the path's next generation. A completion is
//! accepted only while its generation is still the one in flight, so a forced
//! refetch or [`AttributeCache::cancel_all`] turns older fetches into no-ops.
//! Failed fetches write nothing and clear the in-flight slot, so the next
//! request retries. Successful fetches bump the epoch published by
//! [`AttributeCache::subscribe`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::fetch::{AttributeFetcher, FetchedAttributes};
use super::AttributeEntry;
use crate::error::Result;
use crate::types::EntryKind;
use crate::volumes::VolumeTable;

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<AttributeEntry>,
    generation: u64,
    inflight: Option<InFlight>,
}

struct CacheInner {
    fetcher: Arc<dyn AttributeFetcher>,
    volumes: Arc<RwLock<VolumeTable>>,
    slots: Mutex<FnvHashMap<PathBuf, Slot>>,
    epoch_tx: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct AttributeCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for AttributeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl AttributeCache {
    pub fn new(fetcher: Arc<dyn AttributeFetcher>, volumes: Arc<RwLock<VolumeTable>>) -> Self {
        let (epoch_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                volumes,
                slots: Mutex::new(FnvHashMap::default()),
                epoch_tx,
            }),
        }
    }

    /// Bumped after every successful background fetch.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.epoch_tx.subscribe()
    }

    /// Cached attributes without triggering a fetch.
    pub fn peek(&self, path: &Path) -> Option<AttributeEntry> {
        self.inner
            .slots
            .lock()
            .get(path)
            .and_then(|slot| slot.entry.clone())
    }

    pub fn is_fetching(&self, path: &Path) -> bool {
        self.inner
            .slots
            .lock()
            .get(path)
            .is_some_and(|slot| slot.inflight.is_some())
    }

    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attributes of `path` for display.
    ///
    /// Internal paths are resolved inline. External paths return the cached
    /// value or a placeholder and start a background fetch unless one is
    /// already running. `force` refetches even when cached, cancelling the
    /// fetch in flight.
    pub fn request(&self, path: &Path, kind: EntryKind, force: bool) -> AttributeEntry {
        if self.is_internal(path) {
            return self.request_inline(path, kind, force);
        }

        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(path.to_path_buf()).or_default();
        if !force {
            if let Some(entry) = &slot.entry {
                return entry.clone();
            }
            if slot.inflight.is_some() {
                return AttributeEntry::placeholder(kind);
            }
        }
        if let Some(previous) = slot.inflight.take() {
            previous.cancel.cancel();
        }

        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();
        slot.inflight = Some(InFlight {
            generation,
            cancel: cancel.clone(),
        });
        let shown = slot
            .entry
            .clone()
            .unwrap_or_else(|| AttributeEntry::placeholder(kind));
        drop(slots);

        self.spawn_fetch(path.to_path_buf(), generation, cancel);
        shown
    }

    /// Cancels every fetch in flight. Their completions are discarded.
    pub fn cancel_all(&self) {
        let mut slots = self.inner.slots.lock();
        for slot in slots.values_mut() {
            if let Some(inflight) = slot.inflight.take() {
                inflight.cancel.cancel();
                slot.generation += 1;
            }
        }
    }

    fn is_internal(&self, path: &Path) -> bool {
        let table = self.inner.volumes.read();
        table
            .owner_of(path)
            .map_or(true, |volume| table.is_internal(volume))
    }

    fn request_inline(&self, path: &Path, kind: EntryKind, force: bool) -> AttributeEntry {
        if !force {
            if let Some(entry) = self.peek(path) {
                return entry;
            }
        }
        match self.inner.fetcher.fetch(path) {
            Ok(fetched) => {
                let entry = AttributeEntry::from(fetched);
                let mut slots = self.inner.slots.lock();
                let slot = slots.entry(path.to_path_buf()).or_default();
                slot.generation += 1;
                slot.entry = Some(entry.clone());
                entry
            }
            Err(error) => {
                log::debug!("attribute stat failed path={} error={error}", path.display());
                AttributeEntry::unavailable(kind)
            }
        }
    }

    fn spawn_fetch(&self, path: PathBuf, generation: u64, cancel: CancellationToken) {
        let inner = self.inner.clone();
        let task = move || {
            if cancel.is_cancelled() {
                return;
            }
            let result = inner.fetcher.fetch(&path);
            if cancel.is_cancelled() {
                log::debug!("attribute fetch superseded path={}", path.display());
                return;
            }
            inner.complete(&path, generation, result);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => {
                std::thread::spawn(task);
            }
        }
    }
}

impl CacheInner {
    fn complete(&self, path: &Path, generation: u64, result: Result<FetchedAttributes>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(path) else {
            return;
        };
        let current = slot
            .inflight
            .as_ref()
            .is_some_and(|inflight| inflight.generation == generation);
        if !current {
            log::debug!(
                "discarding stale attribute fetch path={} generation={generation}",
                path.display()
            );
            return;
        }
        slot.inflight = None;

        match result {
            Ok(fetched) => {
                slot.entry = Some(AttributeEntry::from(fetched));
                drop(slots);
                self.epoch_tx.send_modify(|epoch| *epoch += 1);
            }
            Err(error) => {
                log::debug!(
                    "attribute fetch failed path={} error={error}",
                    path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then reports `size` after `delay`.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        failures: usize,
        delays: Vec<Duration>,
    }

    impl ScriptedFetcher {
        fn new(failures: usize, delays: Vec<Duration>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
                delays,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AttributeFetcher for ScriptedFetcher {
        fn fetch(&self, path: &Path) -> Result<FetchedAttributes> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(call) {
                std::thread::sleep(*delay);
            }
            if call < self.failures {
                return Err(SearchError::stat(
                    path.to_path_buf(),
                    std::io::Error::from(std::io::ErrorKind::Other),
                ));
            }
            Ok(FetchedAttributes {
                size: Some(call as u64 + 1),
                modified: None,
                kind: EntryKind::File,
            })
        }
    }

    fn external_table() -> Arc<RwLock<VolumeTable>> {
        let mut table = VolumeTable::new();
        table
            .register(PathBuf::from("/nonexistent-usb"), false, true)
            .unwrap();
        table
            .register(PathBuf::from("/nonexistent-disk"), true, true)
            .unwrap();
        Arc::new(RwLock::new(table))
    }

    async fn wait_settled(cache: &AttributeCache, path: &Path) {
        for _ in 0..200 {
            if !cache.is_fetching(path) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fetch for {} never settled", path.display());
    }

    #[test]
    fn internal_paths_resolve_inline() {
        let fetcher = ScriptedFetcher::new(0, Vec::new());
        let cache = AttributeCache::new(fetcher.clone(), external_table());
        let path = Path::new("/nonexistent-disk/a.txt");

        let entry = cache.request(path, EntryKind::File, false);
        assert!(!entry.pending);
        assert_eq!(entry.size, Some(1));
        cache.request(path, EntryKind::File, false);
        assert_eq!(fetcher.calls(), 1);

        let forced = cache.request(path, EntryKind::File, true);
        assert_eq!(forced.size, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_share_one_fetch() {
        let fetcher = ScriptedFetcher::new(0, vec![Duration::from_millis(100)]);
        let cache = AttributeCache::new(fetcher.clone(), external_table());
        let path = PathBuf::from("/nonexistent-usb/movie.mkv");
        let mut epoch = cache.subscribe();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let path = path.clone();
                std::thread::spawn(move || cache.request(&path, EntryKind::File, false))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().pending);
        }

        epoch.changed().await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.peek(&path).unwrap().size, Some(1));
        assert!(!cache.request(&path, EntryKind::File, false).pending);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_write_nothing_and_later_requests_retry() {
        let fetcher = ScriptedFetcher::new(2, Vec::new());
        let cache = AttributeCache::new(fetcher.clone(), external_table());
        let path = PathBuf::from("/nonexistent-usb/photo.jpg");

        for attempt in 1..=2 {
            assert!(cache.request(&path, EntryKind::File, false).pending);
            wait_settled(&cache, &path).await;
            assert_eq!(fetcher.calls(), attempt);
            assert!(cache.peek(&path).is_none());
        }

        let mut epoch = cache.subscribe();
        assert!(cache.request(&path, EntryKind::File, false).pending);
        epoch.changed().await.unwrap();
        let entry = cache.peek(&path).unwrap();
        assert_eq!(entry.size, Some(3));
        assert!(!entry.pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forced_request_supersedes_in_flight_fetch() {
        let fetcher = ScriptedFetcher::new(0, vec![Duration::from_millis(200)]);
        let cache = AttributeCache::new(fetcher.clone(), external_table());
        let path = PathBuf::from("/nonexistent-usb/notes.txt");

        cache.request(&path, EntryKind::File, false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.request(&path, EntryKind::File, true);
        wait_settled(&cache, &path).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.peek(&path).unwrap().size, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_all_discards_completions() {
        let fetcher = ScriptedFetcher::new(0, vec![Duration::from_millis(100)]);
        let cache = AttributeCache::new(fetcher.clone(), external_table());
        let path = PathBuf::from("/nonexistent-usb/a.bin");

        cache.request(&path, EntryKind::File, false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.cancel_all();
        assert!(!cache.is_fetching(&path));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.peek(&path).is_none());
    }
}
