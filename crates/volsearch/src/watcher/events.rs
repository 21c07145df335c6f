//! Volume change events and their translation from `notify`.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

use crate::types::VolumeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEventKind {
    Created(PathBuf),
    Removed(PathBuf),
    Modified(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// The backend dropped events; the volume must be rebuilt.
    Overflow,
    Mounted,
    Unmounted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEvent {
    pub volume: VolumeId,
    pub kind: VolumeEventKind,
}

impl VolumeEvent {
    pub fn new(volume: VolumeId, kind: VolumeEventKind) -> Self {
        Self { volume, kind }
    }

    pub fn created(volume: VolumeId, path: impl Into<PathBuf>) -> Self {
        Self::new(volume, VolumeEventKind::Created(path.into()))
    }

    pub fn removed(volume: VolumeId, path: impl Into<PathBuf>) -> Self {
        Self::new(volume, VolumeEventKind::Removed(path.into()))
    }

    pub fn modified(volume: VolumeId, path: impl Into<PathBuf>) -> Self {
        Self::new(volume, VolumeEventKind::Modified(path.into()))
    }

    pub fn renamed(volume: VolumeId, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::new(
            volume,
            VolumeEventKind::Renamed {
                from: from.into(),
                to: to.into(),
            },
        )
    }

    /// Paths whose state must be re-checked when applying this event.
    pub fn paths(&self) -> Vec<&Path> {
        match &self.kind {
            VolumeEventKind::Created(path)
            | VolumeEventKind::Removed(path)
            | VolumeEventKind::Modified(path) => vec![path.as_path()],
            VolumeEventKind::Renamed { from, to } => vec![from.as_path(), to.as_path()],
            VolumeEventKind::Overflow | VolumeEventKind::Mounted | VolumeEventKind::Unmounted => {
                Vec::new()
            }
        }
    }

    /// Whole-volume events are ordering barriers for coalescing.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self.kind,
            VolumeEventKind::Overflow | VolumeEventKind::Mounted | VolumeEventKind::Unmounted
        )
    }
}

/// Translates one `notify` event into volume events.
pub fn translate_notify_event(volume: VolumeId, root: &Path, event: Event) -> Vec<VolumeEvent> {
    if event.need_rescan() {
        return vec![VolumeEvent::new(volume, VolumeEventKind::Overflow)];
    }

    match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(|path| VolumeEvent::created(volume, path))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .map(|path| {
                if path == root {
                    VolumeEvent::new(volume, VolumeEventKind::Unmounted)
                } else {
                    VolumeEvent::removed(volume, path)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![VolumeEvent::renamed(volume, from, to)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(|path| VolumeEvent::removed(volume, path))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(|path| VolumeEvent::created(volume, path))
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            if event.paths.is_empty() {
                // No path to re-check, so nothing short of a rebuild is safe.
                return vec![VolumeEvent::new(volume, VolumeEventKind::Overflow)];
            }
            event
                .paths
                .into_iter()
                .map(|path| VolumeEvent::modified(volume, path))
                .collect()
        }
    }
}
