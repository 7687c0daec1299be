/// Platform-specific functionality — the OS capability interfaces the
/// directories and watcher are written against, and their adapters.
///
/// The directories never talk to the OS directly. They depend only on
/// [`DeviceBackend`] (one method per OS resource: PnP entry, disk drive,
/// partition, logical volume, plus ejection) and [`VolumeEventSource`].
/// The composition root picks the adapter:
///
/// - Windows: [`windows::WmiBackend`] / [`windows::DeviceChangeEvents`].
/// - Other targets: [`unsupported::UnsupportedBackend`].
/// - Tests and demo mode: [`memory::MemoryBackend`].
use crate::error::DeviceError;
use crate::model::device::has_mass_storage_prefix;
use crate::model::DeviceEjectResult;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod unsupported;
#[cfg(windows)]
pub mod windows;

/// Raw plug-and-play record as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PnpEntity {
    /// Bus-scoped instance id, e.g. `USB\VID_0781&PID_5567\4C53...`.
    pub instance_id: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    /// Hardware-id aliases; may carry the mass-storage prefix even when the
    /// instance id does not.
    pub hardware_ids: Vec<String>,
}

/// A physical disk drive object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskDrive {
    /// OS device path, e.g. `\\.\PHYSICALDRIVE2`.
    pub device_id: String,
    /// Instance id of the PnP device backing this disk.
    pub pnp_device_id: Option<String>,
}

/// A partition on a disk drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPartition {
    /// e.g. `Disk #2, Partition #0`.
    pub device_id: String,
}

/// A logical (lettered) volume, with its fields left as the OS text so
/// numeric parsing can be tolerant in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalDisk {
    /// Drive designator, e.g. `E:`.
    pub device_id: Option<String>,
    pub file_system: Option<String>,
    pub volume_name: Option<String>,
    pub size: Option<String>,
    pub free_space: Option<String>,
}

/// Capability interface over the OS device graph.
///
/// Implementations must be callable from any worker thread.
pub trait DeviceBackend: Send + Sync {
    /// Every plug-and-play entity currently known to the OS.
    fn pnp_entities(&self) -> Result<Vec<PnpEntity>, DeviceError>;

    /// Every disk drive object.
    fn disk_drives(&self) -> Result<Vec<DiskDrive>, DeviceError>;

    /// Partitions associated with `disk`.
    fn partitions_of(&self, disk: &DiskDrive) -> Result<Vec<DiskPartition>, DeviceError>;

    /// Logical volumes associated with `partition`.
    fn logical_disks_of(&self, partition: &DiskPartition) -> Result<Vec<LogicalDisk>, DeviceError>;

    /// Ask the OS to prepare the device for safe removal.
    ///
    /// OS refusals are an unsuccessful result, not an error.
    fn request_eject(&self, instance_id: &str) -> Result<DeviceEjectResult, DeviceError>;
}

/// Which device node receives a safe-removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EjectTarget {
    /// The parent node: the USB device above a `USBSTOR\` disk node.
    Parent,
    /// The node itself.
    Node,
}

impl EjectTarget {
    /// Only mass-storage nodes step up to their parent. A `USB\` device
    /// classified through a hardware-id alias is ejected itself: its parent
    /// is a hub, and ejecting that removes every device behind it.
    pub fn for_instance(instance_id: &str) -> Self {
        if has_mass_storage_prefix(instance_id) {
            Self::Parent
        } else {
            Self::Node
        }
    }
}

/// Result of one bounded wait for a volume-change notification.
#[derive(Debug)]
pub enum WaitOutcome {
    /// A volume arrived or was removed.
    Changed,
    /// The wait elapsed without an event.
    TimedOut,
    /// The wait itself failed.
    Failed(DeviceError),
}

/// A live subscription to volume-change notifications.
///
/// Created and used on the watcher thread only, so it need not be `Send`.
pub trait VolumeEventSubscription {
    fn wait(&mut self, timeout: Duration) -> WaitOutcome;
}

/// Factory for [`VolumeEventSubscription`]s.
pub trait VolumeEventSource: Send + Sync {
    /// Open a subscription on the calling thread.
    fn open(&self) -> Result<Box<dyn VolumeEventSubscription>, DeviceError>;
}

/// The device adapter for the compile target.
pub fn system_backend() -> Arc<dyn DeviceBackend> {
    #[cfg(windows)]
    {
        Arc::new(windows::WmiBackend::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(unsupported::UnsupportedBackend)
    }
}

/// The volume-change notification source for the compile target.
pub fn system_volume_events() -> Arc<dyn VolumeEventSource> {
    #[cfg(windows)]
    {
        Arc::new(windows::DeviceChangeEvents)
    }
    #[cfg(not(windows))]
    {
        Arc::new(unsupported::UnsupportedBackend)
    }
}
