/// Published state snapshots.
///
/// A snapshot is built once, wrapped in an `Arc` and never mutated again;
/// each commit publishes a whole new value.
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use usbsleuth_core::model::{DeviceEjectResult, DeviceEntry, DeviceId, StorageDeviceInfo};
use usbsleuth_core::DeviceError;

/// The kind of the most recently committed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Refresh,
    Eject,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::Eject => "eject",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a snapshot was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCause {
    /// The state a manager starts with; never published.
    Initial,
    /// A refresh was dispatched (`is_scanning` just became `true`).
    ScanStarted,
    /// A refresh finished, successfully or not.
    RefreshCompleted,
    /// The OS answered an eject request (accepted or refused).
    EjectCompleted,
    /// The eject request itself errored.
    EjectFailed,
}

/// Aggregated device state of one manager.
#[derive(Debug, Clone)]
pub struct MainAreaState {
    /// Increases by one with every publication.
    pub generation: u64,
    pub cause: SnapshotCause,
    pub is_scanning: bool,
    /// Listing order of the base directory.
    pub devices: Vec<DeviceEntry>,
    /// Ids whose entry in `devices` is the storage variant.
    pub storages: BTreeSet<DeviceId>,
    pub device_count: usize,
    pub last_operation: Option<Operation>,
    pub last_operation_error: Option<DeviceError>,
    /// Error of the last completed refresh.
    pub refresh_error: Option<DeviceError>,
    pub last_eject_result: Option<DeviceEjectResult>,
    /// When the last successful refresh was committed.
    pub completed_at: Option<DateTime<Local>>,
}

impl Default for MainAreaState {
    fn default() -> Self {
        Self {
            generation: 0,
            cause: SnapshotCause::Initial,
            is_scanning: false,
            devices: Vec::new(),
            storages: BTreeSet::new(),
            device_count: 0,
            last_operation: None,
            last_operation_error: None,
            refresh_error: None,
            last_eject_result: None,
            completed_at: None,
        }
    }
}

impl MainAreaState {
    pub fn find(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.devices.iter().find(|entry| entry.id() == id)
    }

    /// Storage entries in listing order.
    pub fn storage_devices(&self) -> impl Iterator<Item = &StorageDeviceInfo> {
        self.devices.iter().filter_map(DeviceEntry::as_storage)
    }
}
