//! Volume registry: the lookup table behind every `VolumeId`.
//!
//! Ownership rule for overlapping mounts: a path belongs to the volume
//! with the deepest mount path containing it. Mount paths are canonicalized
//! on registration so symlinked mounts collapse onto one volume. Paths of a
//! disabled volume belong to nobody.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::VolumeConfig;
use crate::error::{canonicalize_existing_path, Result, SearchError};
use crate::types::{Volume, VolumeId};

#[derive(Debug, Clone, Default)]
pub struct VolumeTable {
    volumes: BTreeMap<VolumeId, Volume>,
    next_id: u32,
}

impl VolumeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[VolumeConfig]) -> Result<Self> {
        let mut table = Self::new();
        for config in configs {
            table.register(config.mount_path.clone(), config.internal, config.enabled)?;
        }
        Ok(table)
    }

    /// Registers a volume, rejecting a second volume on the same canonical mount.
    pub fn register(&mut self, mount_path: PathBuf, internal: bool, enabled: bool) -> Result<VolumeId> {
        let mount_path = canonicalize_existing_path(mount_path);
        if let Some(existing) = self
            .volumes
            .values()
            .find(|volume| volume.mount_path == mount_path)
        {
            return Err(SearchError::InvalidInput(format!(
                "{} is already registered as volume {}",
                mount_path.display(),
                existing.id
            )));
        }

        let id = VolumeId(self.next_id);
        self.next_id += 1;
        let mut volume = Volume::new(id, mount_path, internal);
        volume.enabled = enabled;
        self.volumes.insert(id, volume);
        Ok(id)
    }

    pub fn get(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.get(&id)
    }

    /// Flips the enabled flag. Returns whether it changed.
    pub fn set_enabled(&mut self, id: VolumeId, enabled: bool) -> Result<bool> {
        let volume = self
            .volumes
            .get_mut(&id)
            .ok_or(SearchError::UnknownVolume(id))?;
        let changed = volume.enabled != enabled;
        volume.enabled = enabled;
        Ok(changed)
    }

    pub fn remove(&mut self, id: VolumeId) -> Option<Volume> {
        self.volumes.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values().filter(|volume| volume.enabled)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Resolves the volume owning `path`. `None` when the deepest volume
    /// containing it is disabled.
    pub fn owner_of(&self, path: &Path) -> Option<VolumeId> {
        self.volumes
            .values()
            .filter(|volume| volume.contains(path))
            .max_by_key(|volume| volume.mount_path.components().count())
            .filter(|volume| volume.enabled)
            .map(|volume| volume.id)
    }

    /// Mount paths of other volumes nested inside `id`'s mount, enabled or
    /// not. A scan of `id` must skip them.
    pub fn nested_mounts(&self, id: VolumeId) -> Vec<PathBuf> {
        let Some(outer) = self.volumes.get(&id) else {
            return Vec::new();
        };
        self.volumes
            .values()
            .filter(|volume| volume.id != id)
            .filter(|volume| {
                volume.mount_path != outer.mount_path && outer.contains(&volume.mount_path)
            })
            .map(|volume| volume.mount_path.clone())
            .collect()
    }

    pub fn is_internal(&self, id: VolumeId) -> bool {
        self.volumes
            .get(&id)
            .map(|volume| volume.internal)
            .unwrap_or(false)
    }
}

/// Lists the system volumes: `/` as the internal volume plus every mount
/// found under `volumes_dir` (e.g. `/Volumes`) as external.
pub fn discover_volumes(volumes_dir: &Path) -> Vec<VolumeConfig> {
    let mut volumes = vec![VolumeConfig {
        mount_path: PathBuf::from("/"),
        internal: true,
        enabled: true,
    }];
    volumes.extend(list_mounts(volumes_dir).into_iter().map(|mount_path| VolumeConfig {
        mount_path,
        internal: false,
        enabled: true,
    }));
    volumes
}

/// Canonical mount points under `volumes_dir`, sorted. Empty when the
/// directory cannot be read.
pub fn list_mounts(volumes_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(volumes_dir) else {
        return Vec::new();
    };
    let mut mounts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .map(canonicalize_existing_path)
        // The boot volume shows up as a symlink back to `/`.
        .filter(|path| path != Path::new("/"))
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

/// Checks full disk access by listing a path that is only readable with it.
pub fn check_full_disk_access(check_path: Option<&Path>) -> bool {
    let Some(check_path) = check_path else {
        return true;
    };
    match fs::read_dir(check_path) {
        Ok(_) => true,
        Err(error) if error.kind() == io::ErrorKind::PermissionDenied => false,
        // A missing path says nothing about permissions.
        Err(_) => true,
    }
}
