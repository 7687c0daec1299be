/// Mass-storage classification and disk → partition → volume correlation.
///
/// Every hop below the PnP enumeration is best-effort: a disk enumeration
/// failure means "no disks right now" (common mid-removal), and a failed
/// association hop contributes zero volumes for that branch.
use super::{BaseDeviceDirectory, UsbDeviceDirectory};
use crate::error::DeviceError;
use crate::model::device::has_mass_storage_prefix;
use crate::model::{
    mount_path_for, BaseDeviceInfo, DeviceEjectResult, DeviceId, StorageDeviceInfo, VolumeInfo,
};
use crate::platform::{DeviceBackend, DiskDrive, LogicalDisk, PnpEntity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Snapshot {
    /// Storage-classified ids, case-insensitive ascending.
    ids: Vec<DeviceId>,
    /// Sorted volumes keyed by the exact instance id of the backing disk.
    volumes: HashMap<String, Vec<VolumeInfo>>,
}

/// [`StorageDeviceDirectory`](super::StorageDeviceDirectory) layered on a
/// shared [`UsbDeviceDirectory`].
pub struct UsbStorageDirectory {
    base: Arc<UsbDeviceDirectory>,
    backend: Arc<dyn DeviceBackend>,
    cache: RwLock<Arc<Snapshot>>,
}

impl UsbStorageDirectory {
    pub fn new(base: Arc<UsbDeviceDirectory>, backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            base,
            backend,
            cache: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// The base directory this layer refreshes and reads identity from.
    pub fn base(&self) -> &Arc<UsbDeviceDirectory> {
        &self.base
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.cache.read())
    }

    fn is_storage(&self, id: &DeviceId) -> bool {
        self.snapshot().ids.iter().any(|known| known == id)
    }

    // ── Volume correlation ─────────────────────────────────────────

    fn disk_drives(&self) -> Vec<DiskDrive> {
        match self.backend.disk_drives() {
            Ok(disks) => disks,
            Err(e) => {
                warn!("Disk drive enumeration failed, assuming none: {}", e);
                Vec::new()
            }
        }
    }

    fn volumes_of(&self, disk: &DiskDrive) -> Vec<VolumeInfo> {
        let partitions = match self.backend.partitions_of(disk) {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!("Partitions of {} unavailable: {}", disk.device_id, e);
                return Vec::new();
            }
        };

        let mut volumes = Vec::new();
        for partition in &partitions {
            match self.backend.logical_disks_of(partition) {
                Ok(logical) => volumes.extend(logical.iter().map(volume_from_logical_disk)),
                Err(e) => warn!("Volumes of {} unavailable: {}", partition.device_id, e),
            }
        }
        debug!(
            "{}: {} partitions, {} volumes",
            disk.device_id,
            partitions.len(),
            volumes.len()
        );

        volumes.sort_by(VolumeInfo::cmp_by_drive_letter);
        volumes
    }

    fn correlate_volumes(&self) -> HashMap<String, Vec<VolumeInfo>> {
        let mut map: HashMap<String, Vec<VolumeInfo>> = HashMap::new();
        for disk in self.disk_drives() {
            let Some(pnp_id) = disk.pnp_device_id.clone() else {
                continue;
            };
            if !has_mass_storage_prefix(&pnp_id) {
                continue;
            }
            let volumes = self.volumes_of(&disk);
            let entry = map.entry(pnp_id).or_default();
            entry.extend(volumes);
            entry.sort_by(VolumeInfo::cmp_by_drive_letter);
        }
        map
    }
}

impl super::StorageDeviceDirectory for UsbStorageDirectory {
    fn refresh(&self) -> Result<(), DeviceError> {
        self.base.refresh()?;

        let mut ids: Vec<DeviceId> = self
            .base
            .entities()
            .iter()
            .filter(|e| is_storage_entity(e))
            .map(|e| DeviceId::new(e.instance_id.clone()))
            .collect();
        ids.sort_by(DeviceId::cmp_casefold);

        let volumes = self.correlate_volumes();
        debug!(
            "Storage directory: {} storage devices, {} disks with volumes",
            ids.len(),
            volumes.len()
        );

        *self.cache.write() = Arc::new(Snapshot { ids, volumes });
        Ok(())
    }

    fn list_storage_device_ids(&self) -> Vec<DeviceId> {
        self.snapshot().ids.clone()
    }

    fn get_storage_device_info(&self, id: &DeviceId) -> Result<StorageDeviceInfo, DeviceError> {
        let snapshot = self.snapshot();
        if !snapshot.ids.iter().any(|known| known == id) {
            return Err(DeviceError::NotFound(id.to_string()));
        }

        let base: BaseDeviceInfo = self.base.get_base_device_info(id)?;
        let volumes = snapshot
            .volumes
            .get(id.instance_id())
            .cloned()
            .unwrap_or_default();
        Ok(StorageDeviceInfo::new(base, volumes))
    }

    fn eject_storage_device(&self, id: &DeviceId) -> Result<DeviceEjectResult, DeviceError> {
        if !self.is_storage(id) {
            return Err(DeviceError::NotFound(id.to_string()));
        }
        let result = self.backend.request_eject(id.instance_id())?;
        if result.success {
            debug!("Eject of {} accepted", id);
        } else {
            warn!("Eject of {} refused (code {})", id, result.config_ret);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for UsbStorageDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbStorageDirectory")
            .field("storage_ids", &self.snapshot().ids.len())
            .finish()
    }
}

/// Storage-classified: the instance id or any hardware-id alias carries the
/// mass-storage prefix.
fn is_storage_entity(entity: &PnpEntity) -> bool {
    has_mass_storage_prefix(&entity.instance_id)
        || entity
            .hardware_ids
            .iter()
            .any(|hw| has_mass_storage_prefix(hw))
}

/// Tolerant unsigned parse: blank or malformed text is absent, never zero.
pub fn parse_optional_u64(value: Option<&str>) -> Option<u64> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }
    text.parse().ok()
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn volume_from_logical_disk(disk: &LogicalDisk) -> VolumeInfo {
    let drive_letter = clean(&disk.device_id);
    VolumeInfo {
        mount_path: drive_letter.as_deref().map(mount_path_for),
        drive_letter,
        file_system: clean(&disk.file_system),
        volume_label: clean(&disk.volume_name),
        total_bytes: parse_optional_u64(disk.size.as_deref()),
        free_bytes: parse_optional_u64(disk.free_space.as_deref()),
    }
}
