/// Device directories — cached, refreshable views of the USB device graph.
///
/// [`UsbDeviceDirectory`] enumerates USB plug-and-play entries;
/// [`UsbStorageDirectory`] layers mass-storage classification and volume
/// correlation on top of it. Both hold an immutable snapshot behind a lock and
/// swap it wholesale on a successful `refresh()`; a failed refresh leaves the
/// previous snapshot in place.
///
/// The directories are not meant to be refreshed from several threads at
/// once. The state managers drive them from a single worker at a time.
use crate::error::DeviceError;
use crate::model::{BaseDeviceInfo, DeviceEjectResult, DeviceId, StorageDeviceInfo};

pub mod base;
pub mod storage;

pub use base::UsbDeviceDirectory;
pub use storage::UsbStorageDirectory;

/// Enumeration of USB plug-and-play devices.
pub trait BaseDeviceDirectory: Send + Sync {
    /// Re-enumerate and replace the cached snapshot.
    fn refresh(&self) -> Result<(), DeviceError>;

    /// Ids in the current snapshot, case-insensitive ascending.
    fn list_base_device_ids(&self) -> Vec<DeviceId>;

    fn get_base_device_info(&self, id: &DeviceId) -> Result<BaseDeviceInfo, DeviceError>;
}

/// Mass-storage devices with their mounted volumes.
pub trait StorageDeviceDirectory: Send + Sync {
    /// Refresh the underlying base directory, then re-correlate volumes.
    fn refresh(&self) -> Result<(), DeviceError>;

    /// Storage-classified ids in the current snapshot, case-insensitive ascending.
    fn list_storage_device_ids(&self) -> Vec<DeviceId>;

    fn get_storage_device_info(&self, id: &DeviceId) -> Result<StorageDeviceInfo, DeviceError>;

    /// Request safe removal. OS refusals come back as `success == false`.
    fn eject_storage_device(&self, id: &DeviceId) -> Result<DeviceEjectResult, DeviceError>;
}
