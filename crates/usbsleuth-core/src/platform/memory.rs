/// In-memory device adapter with mutable fixtures and failure injection.
///
/// Used by the test suites and by the binary's `--demo` mode. Every query
/// reads the current fixtures under a short lock, so fixtures can be changed
/// between refreshes to simulate plugging and unplugging devices.
use super::{
    DeviceBackend, DiskDrive, DiskPartition, LogicalDisk, PnpEntity, VolumeEventSource,
    VolumeEventSubscription, WaitOutcome,
};
use crate::error::DeviceError;
use crate::model::DeviceEjectResult;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A disk with its partitions and the logical volumes on each partition.
#[derive(Debug, Clone, Default)]
pub struct MemoryDisk {
    pub drive: DiskDrive,
    pub partitions: Vec<(DiskPartition, Vec<LogicalDisk>)>,
}

#[derive(Default)]
struct Fixtures {
    entities: Vec<PnpEntity>,
    disks: Vec<MemoryDisk>,
    pnp_failure: Option<DeviceError>,
    disk_failure: Option<DeviceError>,
    failing_partition_lookups: HashSet<String>,
    failing_volume_lookups: HashSet<String>,
    eject_results: HashMap<String, DeviceEjectResult>,
    eject_failure: Option<DeviceError>,
    eject_calls: Vec<String>,
    pnp_queries: usize,
}

/// Fixture-backed [`DeviceBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    fixtures: Mutex<Fixtures>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fixtures ───────────────────────────────────────────────────

    pub fn add_entity(&self, entity: PnpEntity) {
        self.fixtures.lock().entities.push(entity);
    }

    /// Add a PnP entity with only an id and a friendly name.
    pub fn add_device(&self, instance_id: &str, name: &str) {
        self.add_entity(PnpEntity {
            instance_id: instance_id.to_string(),
            name: Some(name.to_string()),
            ..PnpEntity::default()
        });
    }

    pub fn add_disk(&self, disk: MemoryDisk) {
        self.fixtures.lock().disks.push(disk);
    }

    /// Remove the entity and any disk backed by it, as if unplugged.
    pub fn remove_device(&self, instance_id: &str) {
        let mut fixtures = self.fixtures.lock();
        fixtures.entities.retain(|e| e.instance_id != instance_id);
        fixtures
            .disks
            .retain(|d| d.drive.pnp_device_id.as_deref() != Some(instance_id));
    }

    // ── Failure injection ──────────────────────────────────────────

    /// Make the PnP enumeration fail (or succeed again with `None`).
    pub fn fail_pnp_query(&self, error: Option<DeviceError>) {
        self.fixtures.lock().pnp_failure = error;
    }

    /// Make the disk-drive enumeration fail (or succeed again with `None`).
    pub fn fail_disk_query(&self, error: Option<DeviceError>) {
        self.fixtures.lock().disk_failure = error;
    }

    /// Make the disk → partition association fail for one disk.
    pub fn fail_partitions_of(&self, disk_device_id: &str) {
        self.fixtures
            .lock()
            .failing_partition_lookups
            .insert(disk_device_id.to_string());
    }

    /// Make the partition → volume association fail for one partition.
    pub fn fail_logical_disks_of(&self, partition_device_id: &str) {
        self.fixtures
            .lock()
            .failing_volume_lookups
            .insert(partition_device_id.to_string());
    }

    /// Canned result for the next ejections of `instance_id`.
    pub fn set_eject_result(&self, instance_id: &str, result: DeviceEjectResult) {
        self.fixtures
            .lock()
            .eject_results
            .insert(instance_id.to_string(), result);
    }

    /// Make ejection requests error out (or behave again with `None`).
    pub fn fail_eject(&self, error: Option<DeviceError>) {
        self.fixtures.lock().eject_failure = error;
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Instance ids passed to `request_eject`, in call order.
    pub fn eject_calls(&self) -> Vec<String> {
        self.fixtures.lock().eject_calls.clone()
    }

    /// Number of PnP enumerations performed so far.
    pub fn pnp_query_count(&self) -> usize {
        self.fixtures.lock().pnp_queries
    }

    /// A small, realistic fixture set: a hub, a keyboard, and two flash
    /// drives (one with two volumes, one without a mounted volume).
    pub fn demo() -> Self {
        let backend = Self::new();

        backend.add_device(r"USB\ROOT_HUB30\4&2F3B1C9A&0&0", "USB Root Hub (USB 3.0)");
        backend.add_entity(PnpEntity {
            instance_id: r"USB\VID_046D&PID_C31C\6&1C8F0B3A&0&2".into(),
            name: Some("USB Input Device".into()),
            manufacturer: Some("(Standard system devices)".into()),
            description: None,
            hardware_ids: vec![r"USB\VID_046D&PID_C31C&REV_6400".into()],
        });

        let cruzer = r"USBSTOR\DISK&VEN_SANDISK&PROD_CRUZER_BLADE&REV_1.00\4C530001230517115423&0";
        backend.add_device(
            r"USB\VID_0781&PID_5567\4C530001230517115423",
            "USB Mass Storage Device",
        );
        backend.add_entity(PnpEntity {
            instance_id: cruzer.into(),
            name: Some("SanDisk Cruzer Blade USB Device".into()),
            manufacturer: Some("(Standard disk drives)".into()),
            description: Some("Disk drive".into()),
            hardware_ids: vec![r"USBSTOR\DiskSanDisk_Cruzer_Blade___1.00".into()],
        });
        backend.add_disk(MemoryDisk {
            drive: DiskDrive {
                device_id: r"\\.\PHYSICALDRIVE2".into(),
                pnp_device_id: Some(cruzer.into()),
            },
            partitions: vec![
                (
                    DiskPartition {
                        device_id: "Disk #2, Partition #0".into(),
                    },
                    vec![LogicalDisk {
                        device_id: Some("E:".into()),
                        file_system: Some("FAT32".into()),
                        volume_name: Some("CRUZER".into()),
                        size: Some("15376000000".into()),
                        free_space: Some("9123450880".into()),
                    }],
                ),
                (
                    DiskPartition {
                        device_id: "Disk #2, Partition #1".into(),
                    },
                    vec![LogicalDisk {
                        device_id: Some("F:".into()),
                        file_system: Some("NTFS".into()),
                        volume_name: Some("BACKUP".into()),
                        size: Some("1073741824".into()),
                        free_space: Some("536870912".into()),
                    }],
                ),
            ],
        });

        let kingston =
            r"USBSTOR\DISK&VEN_KINGSTON&PROD_DATATRAVELER_3.0&REV_PMAP\E0D55EA574C1F6A0B9B1003C&0";
        backend.add_device(
            r"USB\VID_0951&PID_1666\E0D55EA574C1F6A0B9B1003C",
            "USB Mass Storage Device",
        );
        backend.add_device(kingston, "Kingston DataTraveler 3.0 USB Device");
        backend.add_disk(MemoryDisk {
            drive: DiskDrive {
                device_id: r"\\.\PHYSICALDRIVE3".into(),
                pnp_device_id: Some(kingston.into()),
            },
            partitions: Vec::new(),
        });

        backend
    }
}

impl DeviceBackend for MemoryBackend {
    fn pnp_entities(&self) -> Result<Vec<PnpEntity>, DeviceError> {
        let mut fixtures = self.fixtures.lock();
        fixtures.pnp_queries += 1;
        match &fixtures.pnp_failure {
            Some(e) => Err(e.clone()),
            None => Ok(fixtures.entities.clone()),
        }
    }

    fn disk_drives(&self) -> Result<Vec<DiskDrive>, DeviceError> {
        let fixtures = self.fixtures.lock();
        match &fixtures.disk_failure {
            Some(e) => Err(e.clone()),
            None => Ok(fixtures.disks.iter().map(|d| d.drive.clone()).collect()),
        }
    }

    fn partitions_of(&self, disk: &DiskDrive) -> Result<Vec<DiskPartition>, DeviceError> {
        let fixtures = self.fixtures.lock();
        if fixtures.failing_partition_lookups.contains(&disk.device_id) {
            return Err(DeviceError::query(
                "Win32_DiskDriveToDiskPartition",
                format!("association failed for {}", disk.device_id),
            ));
        }
        Ok(fixtures
            .disks
            .iter()
            .filter(|d| d.drive.device_id == disk.device_id)
            .flat_map(|d| d.partitions.iter().map(|(p, _)| p.clone()))
            .collect())
    }

    fn logical_disks_of(&self, partition: &DiskPartition) -> Result<Vec<LogicalDisk>, DeviceError> {
        let fixtures = self.fixtures.lock();
        if fixtures.failing_volume_lookups.contains(&partition.device_id) {
            return Err(DeviceError::query(
                "Win32_LogicalDiskToPartition",
                format!("association failed for {}", partition.device_id),
            ));
        }
        Ok(fixtures
            .disks
            .iter()
            .flat_map(|d| d.partitions.iter())
            .filter(|(p, _)| p.device_id == partition.device_id)
            .flat_map(|(_, volumes)| volumes.iter().cloned())
            .collect())
    }

    fn request_eject(&self, instance_id: &str) -> Result<DeviceEjectResult, DeviceError> {
        let result = {
            let mut fixtures = self.fixtures.lock();
            fixtures.eject_calls.push(instance_id.to_string());
            if let Some(e) = &fixtures.eject_failure {
                return Err(e.clone());
            }
            fixtures
                .eject_results
                .get(instance_id)
                .cloned()
                .unwrap_or_else(|| DeviceEjectResult {
                    success: true,
                    attempted_instance_id: instance_id.to_string(),
                    config_ret: 0,
                })
        };

        if result.success {
            self.remove_device(instance_id);
        }
        Ok(result)
    }
}

/// Manually triggered volume-change notifications.
///
/// Clones share one queue; every subscription drains the same queue.
#[derive(Clone)]
pub struct MemoryVolumeEvents {
    tx: Sender<Result<(), DeviceError>>,
    rx: Receiver<Result<(), DeviceError>>,
}

impl Default for MemoryVolumeEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVolumeEvents {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Queue one "volume changed" notification.
    pub fn notify_change(&self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Make the next wait fail with `error`.
    pub fn inject_failure(&self, error: DeviceError) {
        let _ = self.tx.send(Err(error));
    }
}

impl VolumeEventSource for MemoryVolumeEvents {
    fn open(&self) -> Result<Box<dyn VolumeEventSubscription>, DeviceError> {
        Ok(Box::new(MemorySubscription {
            rx: self.rx.clone(),
        }))
    }
}

struct MemorySubscription {
    rx: Receiver<Result<(), DeviceError>>,
}

impl VolumeEventSubscription for MemorySubscription {
    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(())) => WaitOutcome::Changed,
            Ok(Err(e)) => WaitOutcome::Failed(e),
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                WaitOutcome::Failed(DeviceError::Worker("event queue closed".into()))
            }
        }
    }
}
