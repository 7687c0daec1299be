/// Data model for UsbSleuth.
///
/// Re-exports the device value types and the byte-size formatting helpers
/// used by front ends to render volume capacities.
pub mod device;
pub mod size;

pub use device::{
    mount_path_for, parse_usb_ids, sort_device_ids, BaseDeviceInfo, DeviceEjectResult,
    DeviceEntry, DeviceId, ParsedUsbIds, StorageDeviceInfo, VolumeInfo,
};
