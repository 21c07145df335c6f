//! Batch coalescing for volume events.
//!
//! Changes are applied by re-checking paths on disk, so within one batch:
//!
//! - Only the first event for a `(volume, path)` pair matters; repeats are
//!   dropped without reordering the rest.
//! - A volume that overflowed, mounted or unmounted in the batch is about to
//!   be rebuilt or dropped, so its path events are dropped and only its
//!   whole-volume events are kept (deduplicated, in order).
//!
//! ```text
//! Input:  [Created(/a), Modified(/b), Modified(/a), Renamed(/b -> /c)]
//! Output: [Created(/a), Modified(/b), Modified(/c)]
//! ```

use std::path::PathBuf;

use fnv::FnvHashSet;

use super::events::{VolumeEvent, VolumeEventKind};
use crate::types::VolumeId;

pub fn coalesce_events(events: Vec<VolumeEvent>) -> Vec<VolumeEvent> {
    if events.len() <= 1 {
        return events;
    }

    let barrier_volumes: FnvHashSet<VolumeId> = events
        .iter()
        .filter(|event| event.is_barrier())
        .map(|event| event.volume)
        .collect();

    let mut seen_paths: FnvHashSet<(VolumeId, PathBuf)> = FnvHashSet::default();
    let mut last_barrier: Option<VolumeEvent> = None;
    let mut coalesced = Vec::with_capacity(events.len());

    for event in events {
        if event.is_barrier() {
            // Consecutive identical barriers collapse into one.
            if last_barrier.as_ref() == Some(&event) {
                continue;
            }
            last_barrier = Some(event.clone());
            coalesced.push(event);
            continue;
        }
        if barrier_volumes.contains(&event.volume) {
            continue;
        }

        let volume = event.volume;
        match event.kind {
            VolumeEventKind::Renamed { from, to } => {
                let from_new = seen_paths.insert((volume, from.clone()));
                let to_new = seen_paths.insert((volume, to.clone()));
                match (from_new, to_new) {
                    (true, true) => coalesced.push(VolumeEvent::renamed(volume, from, to)),
                    (true, false) => coalesced.push(VolumeEvent::modified(volume, from)),
                    (false, true) => coalesced.push(VolumeEvent::modified(volume, to)),
                    (false, false) => {}
                }
            }
            kind => {
                let event = VolumeEvent::new(volume, kind);
                let is_new = event
                    .paths()
                    .first()
                    .map(|path| seen_paths.insert((volume, path.to_path_buf())))
                    .unwrap_or(true);
                if is_new {
                    coalesced.push(event);
                }
            }
        }
    }

    coalesced
}
