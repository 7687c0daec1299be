/// Adapter for targets other than Windows.
///
/// No enumeration is attempted; every call reports `Unsupported` so the
/// state layer surfaces a clear error instead of an empty device list.
use super::{
    DeviceBackend, DiskDrive, DiskPartition, LogicalDisk, PnpEntity, VolumeEventSource,
    VolumeEventSubscription,
};
use crate::error::DeviceError;
use crate::model::DeviceEjectResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl DeviceBackend for UnsupportedBackend {
    fn pnp_entities(&self) -> Result<Vec<PnpEntity>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn disk_drives(&self) -> Result<Vec<DiskDrive>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn partitions_of(&self, _disk: &DiskDrive) -> Result<Vec<DiskPartition>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn logical_disks_of(
        &self,
        _partition: &DiskPartition,
    ) -> Result<Vec<LogicalDisk>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn request_eject(&self, _instance_id: &str) -> Result<DeviceEjectResult, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

impl VolumeEventSource for UnsupportedBackend {
    fn open(&self) -> Result<Box<dyn VolumeEventSubscription>, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}
