//! Per-volume watch registration.
//!
//! Each enabled volume gets one recursive watch. A failed registration is
//! retried in the background with exponential backoff and never affects other
//! volumes. When a retry finally succeeds the volume may have missed changes,
//! so an `Overflow` event is emitted to force a rebuild.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHashMap;
use notify::{recommended_watcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::{translate_notify_event, VolumeEvent, VolumeEventKind};
use crate::config::WatchConfig;
use crate::error::{Result, SearchError};
use crate::types::{Volume, VolumeId};

/// Keeps a registered watch alive until dropped.
pub type WatchGuard = Box<dyn Send>;

/// Forwards raw backend notifications for one volume into the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    volume: VolumeId,
    root: PathBuf,
    tx: mpsc::UnboundedSender<VolumeEvent>,
}

impl EventSink {
    pub fn volume(&self) -> VolumeId {
        self.volume
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn send(&self, event: VolumeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn forward(&self, result: notify::Result<notify::Event>) {
        match result {
            Ok(event) => {
                for translated in translate_notify_event(self.volume, &self.root, event) {
                    self.send(translated);
                }
            }
            Err(error) => {
                log::warn!(
                    "watch backend error volume={} root={} error={error}",
                    self.volume,
                    self.root.display()
                );
                self.send(VolumeEvent::new(self.volume, VolumeEventKind::Overflow));
            }
        }
    }
}

/// A source of recursive change notifications.
pub trait WatchBackend: Send + Sync + 'static {
    fn watch(&self, root: &Path, sink: EventSink) -> Result<WatchGuard>;
}

/// `notify`'s recommended backend for the current platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
    fn watch(&self, root: &Path, sink: EventSink) -> Result<WatchGuard> {
        let volume = sink.volume();
        let registration_error = |message: String| SearchError::WatchRegistration {
            volume,
            root: root.to_path_buf(),
            message,
        };

        let mut watcher = recommended_watcher(move |result| sink.forward(result))
            .map_err(|error| registration_error(error.to_string()))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|error| registration_error(error.to_string()))?;
        Ok(Box::new(watcher))
    }
}

struct Registration {
    generation: u64,
    guard: Option<WatchGuard>,
    retry: Option<CancellationToken>,
}

struct WatcherShared {
    backend: Arc<dyn WatchBackend>,
    config: WatchConfig,
    tx: mpsc::UnboundedSender<VolumeEvent>,
    registrations: Mutex<FnvHashMap<VolumeId, Registration>>,
    next_generation: Mutex<u64>,
}

impl WatcherShared {
    fn sink(&self, volume: VolumeId, root: &Path) -> EventSink {
        EventSink {
            volume,
            root: root.to_path_buf(),
            tx: self.tx.clone(),
        }
    }

    /// Stores `guard` if the registration is still the one that asked for it.
    fn install(&self, volume: VolumeId, generation: u64, guard: WatchGuard) -> bool {
        let mut registrations = self.registrations.lock();
        match registrations.get_mut(&volume) {
            Some(registration) if registration.generation == generation => {
                registration.guard = Some(guard);
                registration.retry = None;
                true
            }
            _ => false,
        }
    }
}

/// Owns the watches of every registered volume.
#[derive(Clone)]
pub struct VolumeWatcher {
    shared: Arc<WatcherShared>,
}

impl VolumeWatcher {
    /// Creates a watcher and the channel its raw events are delivered on.
    pub fn new(
        backend: Arc<dyn WatchBackend>,
        config: WatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<VolumeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = WatcherShared {
            backend,
            config,
            tx,
            registrations: Mutex::new(FnvHashMap::default()),
            next_generation: Mutex::new(0),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Sender for synthetic events, e.g. mount notifications.
    pub fn sender(&self) -> mpsc::UnboundedSender<VolumeEvent> {
        self.shared.tx.clone()
    }

    /// Registers a recursive watch on the volume root.
    ///
    /// On failure the error is returned and a background retry is scheduled;
    /// must be called within a tokio runtime.
    pub fn register(&self, volume: &Volume) -> Result<()> {
        self.unregister(volume.id);

        let generation = {
            let mut next = self.shared.next_generation.lock();
            *next += 1;
            *next
        };
        self.shared.registrations.lock().insert(
            volume.id,
            Registration {
                generation,
                guard: None,
                retry: None,
            },
        );

        let sink = self.shared.sink(volume.id, &volume.mount_path);
        match self.shared.backend.watch(&volume.mount_path, sink) {
            Ok(guard) => {
                self.shared.install(volume.id, generation, guard);
                log::info!(
                    "watcher registered volume={} root={}",
                    volume.id,
                    volume.mount_path.display()
                );
                Ok(())
            }
            Err(error) => {
                log::warn!(
                    "watcher registration failed volume={} root={} error={error}",
                    volume.id,
                    volume.mount_path.display()
                );
                self.schedule_retry(volume.id, volume.mount_path.clone(), generation);
                Err(error)
            }
        }
    }

    fn schedule_retry(&self, volume: VolumeId, root: PathBuf, generation: u64) {
        let cancel = CancellationToken::new();
        {
            let mut registrations = self.shared.registrations.lock();
            match registrations.get_mut(&volume) {
                Some(registration) if registration.generation == generation => {
                    registration.retry = Some(cancel.clone());
                }
                _ => return,
            }
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                let delay = shared.config.retry_delay(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let sink = shared.sink(volume, &root);
                match shared.backend.watch(&root, sink) {
                    Ok(guard) => {
                        if shared.install(volume, generation, guard) {
                            log::info!(
                                "watcher registered after retry volume={volume} root={} attempts={}",
                                root.display(),
                                attempt + 2
                            );
                            let _ = shared
                                .tx
                                .send(VolumeEvent::new(volume, VolumeEventKind::Overflow));
                        }
                        return;
                    }
                    Err(error) => {
                        log::warn!(
                            "watcher retry failed volume={volume} root={} delay_ms={} error={error}",
                            root.display(),
                            delay.as_millis()
                        );
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }

    /// Drops the watch of `volume` and cancels its pending retries.
    pub fn unregister(&self, volume: VolumeId) {
        let removed = self.shared.registrations.lock().remove(&volume);
        if let Some(registration) = removed {
            if let Some(retry) = registration.retry {
                retry.cancel();
            }
            if registration.guard.is_some() {
                log::info!("watcher unregistered volume={volume}");
            }
        }
    }

    pub fn unregister_all(&self) {
        let drained: Vec<Registration> = self
            .shared
            .registrations
            .lock()
            .drain()
            .map(|(_, registration)| registration)
            .collect();
        for registration in drained {
            if let Some(retry) = registration.retry {
                retry.cancel();
            }
        }
    }

    /// True once the watch for `volume` is live.
    pub fn is_registered(&self, volume: VolumeId) -> bool {
        self.shared
            .registrations
            .lock()
            .get(&volume)
            .map(|registration| registration.guard.is_some())
            .unwrap_or(false)
    }

    pub fn is_retrying(&self, volume: VolumeId) -> bool {
        self.shared
            .registrations
            .lock()
            .get(&volume)
            .map(|registration| registration.retry.is_some())
            .unwrap_or(false)
    }
}
