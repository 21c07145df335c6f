use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;
use volsearch::attributes::{AttributeEntry, FetchedAttributes};
use volsearch::watcher::{EventSink, WatchGuard};
use volsearch::{
    sort, AttributeCache, AttributeFetcher, EntryKind, FilterChain, FolderFilter, FsFetcher,
    IndexRules, Indexer, QuickFilter, Result, ScoredResult, SearchConfig,
    SearchContext, SearchError, SortField, SortState, VolumeConfig, VolumeEvent, VolumeFilter,
    VolumeId, VolumeTable, WatchBackend,
};

#[derive(Default)]
struct ManualBackend {
    sinks: Mutex<Vec<EventSink>>,
}

impl WatchBackend for ManualBackend {
    fn watch(&self, _root: &Path, sink: EventSink) -> Result<WatchGuard> {
        self.sinks.lock().push(sink);
        Ok(Box::new(()))
    }
}

/// Fails the first `failures` calls, sleeping `delay` before every answer.
struct CountingFetcher {
    calls: AtomicUsize,
    failures: usize,
    delay: Duration,
}

impl CountingFetcher {
    fn new(failures: usize, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AttributeFetcher for CountingFetcher {
    fn fetch(&self, path: &Path) -> Result<FetchedAttributes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if call < self.failures {
            return Err(SearchError::InvalidInput(format!(
                "{} is busy",
                path.display()
            )));
        }
        Ok(FetchedAttributes {
            size: Some(42),
            modified: None,
            kind: EntryKind::File,
        })
    }
}

/// A canonical temp dir with `names` created as empty subdirectories.
fn workspace(names: &[&str]) -> (TempDir, Vec<PathBuf>) {
    let temp = TempDir::new().unwrap();
    let base = fs::canonicalize(temp.path()).unwrap();
    let roots = names
        .iter()
        .map(|name| {
            let root = base.join(name);
            fs::create_dir_all(&root).unwrap();
            root
        })
        .collect();
    (temp, roots)
}

fn write_sized(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'x'; size]).unwrap();
}

fn result_paths(results: &[ScoredResult]) -> Vec<PathBuf> {
    results.iter().map(|result| result.path().to_path_buf()).collect()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

fn wait_blocking<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition never held");
}

fn internal_config(root: &Path) -> SearchConfig {
    SearchConfig {
        volumes: vec![VolumeConfig {
            mount_path: root.to_path_buf(),
            internal: true,
            enabled: true,
        }],
        ..SearchConfig::default()
    }
}

fn indexed(root: &Path) -> (Arc<RwLock<VolumeTable>>, Indexer) {
    let volumes = Arc::new(RwLock::new(VolumeTable::new()));
    let id = volumes.write().register(root.to_path_buf(), true, true).unwrap();
    let indexer = Indexer::new(volumes.clone(), IndexRules::default());
    indexer.rebuild_volume(id).unwrap();
    (volumes, indexer)
}

/// Path to kind, for comparing index contents.
fn contents(indexer: &Indexer) -> BTreeMap<PathBuf, EntryKind> {
    indexer
        .snapshot()
        .entries()
        .map(|entry| (entry.path.clone(), entry.kind))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn query_narrows_and_size_sort_orders_recents() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    let doc = root.join("a/doc.txt");
    let draft = root.join("a/draft.txt");
    write_sized(&doc, 1000);
    write_sized(&draft, 2000);

    let context = SearchContext::with_backends(
        internal_config(root),
        Arc::new(ManualBackend::default()),
        Arc::new(FsFetcher),
    )
    .unwrap();
    context.start().unwrap();
    wait_until(|| context.snapshot().len() == 4).await;

    context.set_query("doc");
    wait_until(|| result_paths(&context.current_results()) == vec![doc.clone()]).await;

    context.set_query("");
    context.set_sort_field(SortField::Size);
    context.set_reverse_sort(true);
    wait_until(|| result_paths(&context.current_results()) == vec![draft.clone(), doc.clone()])
        .await;
    let results = context.current_results();
    assert_eq!(results[0].size(), 2000);
    assert_eq!(results[1].size(), 1000);

    context.cleanup();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_query_without_filters_shows_recents() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    write_sized(&root.join("notes.txt"), 10);
    write_sized(&root.join("photos/beach.jpg"), 10);

    let context = SearchContext::with_backends(
        internal_config(root),
        Arc::new(ManualBackend::default()),
        Arc::new(FsFetcher),
    )
    .unwrap();
    context.start().unwrap();
    let recents = context.recents();
    wait_until(|| recents.borrow().len() == 2).await;
    wait_until(|| result_paths(&context.current_results()) == result_paths(&recents.borrow()))
        .await;

    context.set_query("qqqzzz");
    wait_until(|| context.current_results().is_empty()).await;
    assert_eq!(recents.borrow().len(), 2);

    context.set_query("   ");
    wait_until(|| context.current_results().len() == 2).await;
    context.cleanup();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn created_files_reach_results_through_the_watcher() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    write_sized(&root.join("notes.txt"), 10);

    let backend = Arc::new(ManualBackend::default());
    let mut config = internal_config(root);
    config.watch.debounce_ms = 10;
    let context = SearchContext::with_backends(config, backend.clone(), Arc::new(FsFetcher)).unwrap();
    context.start().unwrap();
    wait_until(|| context.snapshot().len() == 2).await;
    wait_until(|| !backend.sinks.lock().is_empty()).await;

    context.set_query("invoice");
    let created = root.join("bills/invoice.pdf");
    write_sized(&created, 10);
    let sink = backend.sinks.lock()[0].clone();
    sink.send(VolumeEvent::created(sink.volume(), root.join("bills")));

    wait_until(|| result_paths(&context.current_results()) == vec![created.clone()]).await;
    context.cleanup();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mounts_appearing_after_start_get_their_own_volume() {
    let (_temp, roots) = workspace(&["disk", "Volumes"]);
    write_sized(&roots[0].join("notes.txt"), 10);
    let usb = roots[1].join("USB");

    let backend = Arc::new(ManualBackend::default());
    let mut config = internal_config(&roots[0]);
    config.volumes_dir = Some(roots[1].clone());
    config.mount_poll_ms = 50;
    config.watch.debounce_ms = 10;
    let context = SearchContext::with_backends(config, backend.clone(), Arc::new(FsFetcher)).unwrap();
    context.start().unwrap();
    wait_until(|| context.snapshot().len() == 2).await;

    let photo = usb.join("photo.jpg");
    write_sized(&photo, 10);
    let usb_volume = || {
        context
            .volumes()
            .into_iter()
            .find(|volume| volume.mount_path == usb)
            .map(|volume| volume.id)
    };
    wait_until(|| {
        let (Some(volume), Some(entry)) = (usb_volume(), context.snapshot().get(&photo).cloned())
        else {
            return false;
        };
        entry.volume == volume
    })
    .await;
    assert_ne!(usb_volume(), Some(VolumeId(0)));
    wait_until(|| backend.sinks.lock().len() == 2).await;

    fs::remove_dir_all(&usb).unwrap();
    wait_until(|| usb_volume().is_none()).await;
    wait_until(|| context.snapshot().entries().all(|entry| !entry.path.starts_with(&usb))).await;
    assert_eq!(context.snapshot().len(), 2);
    context.cleanup();
}

#[test]
fn disabling_a_volume_mid_rebuild_leaves_other_volumes_alone() {
    let (_temp, roots) = workspace(&["internal", "usb"]);
    write_sized(&roots[0].join("home/notes.txt"), 10);
    for index in 0..50 {
        write_sized(&roots[1].join(format!("backup/{index}.bin")), 10);
    }

    let volumes = Arc::new(RwLock::new(VolumeTable::new()));
    let internal = volumes.write().register(roots[0].clone(), true, true).unwrap();
    let usb = volumes.write().register(roots[1].clone(), false, true).unwrap();
    let indexer = Indexer::new(volumes.clone(), IndexRules::default());
    indexer.rebuild_volume(internal).unwrap();
    let before = contents(&indexer);
    assert_eq!(before.len(), 3);

    let ticket = indexer.begin_rebuild(usb).unwrap();
    assert!(indexer.is_indexing());
    volumes.write().set_enabled(usb, false).unwrap();
    indexer.remove_volume(usb);

    let error = indexer.run_rebuild(ticket).unwrap_err();
    assert!(matches!(error, SearchError::ScanCancelled(volume) if volume == usb));
    let snapshot = indexer.snapshot();
    assert!(snapshot.volume(usb).is_none());
    assert!(snapshot.entries().all(|entry| entry.volume != usb));
    assert_eq!(contents(&indexer), before);
    assert!(!indexer.is_indexing());
    assert!(indexer.begin_rebuild(usb).is_err());
}

#[test]
fn incremental_events_converge_with_a_full_rebuild() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    write_sized(&root.join("docs/a.txt"), 1);
    write_sized(&root.join("docs/old/b.txt"), 1);
    write_sized(&root.join("music/song.mp3"), 1);

    let (volumes, indexer) = indexed(root);
    let volume = volumes.read().owner_of(root).unwrap();

    write_sized(&root.join("docs/c.txt"), 1);
    write_sized(&root.join("new/deep/d.txt"), 1);
    fs::rename(root.join("docs/old"), root.join("archive")).unwrap();
    fs::remove_dir_all(root.join("music")).unwrap();
    fs::create_dir_all(root.join("App.app/Contents")).unwrap();

    indexer.apply_batch(vec![
        VolumeEvent::created(volume, root.join("docs/c.txt")),
        VolumeEvent::created(volume, root.join("new")),
        VolumeEvent::renamed(volume, root.join("docs/old"), root.join("archive")),
        VolumeEvent::removed(volume, root.join("music")),
        VolumeEvent::created(volume, root.join("App.app/Contents")),
    ]);

    let (_, fresh) = indexed(root);
    assert_eq!(contents(&indexer), contents(&fresh));
    let packaged = contents(&indexer);
    assert_eq!(packaged.get(&root.join("App.app")), Some(&EntryKind::Package));
    assert!(!packaged.contains_key(&root.join("App.app/Contents")));
    assert!(packaged.contains_key(&root.join("archive/b.txt")));
}

#[test]
fn clearing_filters_restores_every_candidate() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    write_sized(&root.join("docs/report.pdf"), 1);
    write_sized(&root.join("photos/beach.jpg"), 1);
    let (_, indexer) = indexed(root);
    let snapshot = indexer.snapshot();
    let everything = FilterChain::default().candidates(&snapshot);
    assert_eq!(everything.len(), snapshot.len());

    let combinations = [
        FilterChain {
            folder: FolderFilter::from_paths([root.join("docs")]),
            ..FilterChain::default()
        },
        FilterChain {
            volume: VolumeFilter::Volume(VolumeId(7)),
            ..FilterChain::default()
        },
        FilterChain {
            folder: FolderFilter::from_paths([root.join("photos")]),
            quick: Some(QuickFilter {
                id: "Images".into(),
                query: "jpg$".into(),
                key: Some('i'),
            }),
            volume: VolumeFilter::All,
        },
    ];
    for mut chain in combinations {
        assert!(chain.candidates(&snapshot).len() < everything.len());
        chain.clear_all();
        assert!(chain.is_unrestricted());
        assert_eq!(chain, FilterChain::default());
        assert_eq!(chain.candidates(&snapshot).len(), everything.len());
    }
}

#[test]
fn concurrent_requests_share_one_fetch() {
    let (_temp, roots) = workspace(&["usb"]);
    let path = roots[0].join("movie.mkv");
    let volumes = Arc::new(RwLock::new(VolumeTable::new()));
    volumes.write().register(roots[0].clone(), false, true).unwrap();
    let fetcher = Arc::new(CountingFetcher::new(0, Duration::from_millis(100)));
    let cache = AttributeCache::new(fetcher.clone(), volumes);

    let shown: Vec<AttributeEntry> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| cache.request(&path, EntryKind::File, false)))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(shown.iter().all(|entry| entry.pending));

    wait_blocking(|| cache.peek(&path).is_some());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.request(&path, EntryKind::File, false).size, Some(42));
    assert_eq!(fetcher.calls(), 1);
}

#[test]
fn failed_fetches_are_retried_until_one_succeeds() {
    let (_temp, roots) = workspace(&["usb"]);
    let path = roots[0].join("movie.mkv");
    let volumes = Arc::new(RwLock::new(VolumeTable::new()));
    volumes.write().register(roots[0].clone(), false, true).unwrap();
    let fetcher = Arc::new(CountingFetcher::new(2, Duration::from_millis(5)));
    let cache = AttributeCache::new(fetcher.clone(), volumes);

    for attempt in 1..=2 {
        assert!(cache.request(&path, EntryKind::File, false).pending);
        wait_blocking(|| fetcher.calls() == attempt && !cache.is_fetching(&path));
        assert!(cache.peek(&path).is_none());
    }

    assert!(cache.request(&path, EntryKind::File, false).pending);
    wait_blocking(|| cache.peek(&path).is_some());
    assert_eq!(fetcher.calls(), 3);
    let entry = cache.peek(&path).unwrap();
    assert_eq!(entry.size, Some(42));
    assert!(!entry.pending);
}

#[test]
fn sorting_twice_changes_nothing() {
    let (_temp, roots) = workspace(&["volume"]);
    let root = &roots[0];
    for (name, size) in [("b.txt", 5), ("a.txt", 5), ("c.md", 1), ("dir/z.txt", 9), ("dir/A.txt", 9)] {
        write_sized(&root.join(name), size);
    }
    let (_, indexer) = indexed(root);
    let results: Vec<ScoredResult> = indexer
        .snapshot()
        .entries()
        .map(|entry| {
            let size = fs::metadata(&entry.path).ok().filter(|meta| meta.is_file()).map(|meta| meta.len());
            let mut result = ScoredResult::unscored(entry.clone());
            result.attributes = Some(AttributeEntry::resolved(size, None, entry.kind));
            result
        })
        .collect();

    let fields = [
        SortField::Score,
        SortField::Kind,
        SortField::Name,
        SortField::Path,
        SortField::Size,
        SortField::Date,
    ];
    for field in fields {
        for reverse in [false, true] {
            let state = SortState { field, reverse };
            let mut once = results.clone();
            sort(&mut once, state);
            let mut twice = once.clone();
            sort(&mut twice, state);
            assert_eq!(result_paths(&once), result_paths(&twice), "{field:?} {reverse}");

            let mut shuffled = results.clone();
            shuffled.reverse();
            sort(&mut shuffled, state);
            assert_eq!(result_paths(&once), result_paths(&shuffled), "{field:?} {reverse}");
        }
    }
}
