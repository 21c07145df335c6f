//! Filesystem watching.
//!
//! - `notify` registrations per volume with retrying backoff
//! - translation of backend notifications into [`VolumeEvent`]s
//! - debounced, coalesced delivery in arrival order

mod coalesce;
mod events;
mod pump;
mod volume_watcher;

pub use coalesce::coalesce_events;
pub use events::{translate_notify_event, VolumeEvent, VolumeEventKind};
pub use pump::{spawn_event_pump, EventBatch};
pub use volume_watcher::{EventSink, NotifyBackend, VolumeWatcher, WatchBackend, WatchGuard};
