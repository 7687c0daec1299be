/// Windows adapter — WMI for the device graph, Configuration Manager for
/// ejection, and `WM_DEVICECHANGE` for volume notifications.
///
/// # Threading
///
/// WMI connections are COM objects bound to the thread that created them.
/// Each worker thread lazily opens its own connection on first use and keeps
/// it in a thread-local until the thread exits.
use super::{DeviceBackend, DiskDrive, DiskPartition, EjectTarget, LogicalDisk, PnpEntity};
use crate::error::DeviceError;
use crate::model::DeviceEjectResult;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use wmi::{COMLibrary, Variant, WMIConnection};

mod eject;
mod notify;

pub use notify::DeviceChangeEvents;

thread_local! {
    static CONNECTION: RefCell<Option<WMIConnection>> = const { RefCell::new(None) };
}

/// Process-wide COM security may only be initialised once.
static COM_SECURITY_DONE: AtomicBool = AtomicBool::new(false);

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_PnPEntity")]
#[serde(rename_all = "PascalCase")]
struct Win32PnPEntity {
    #[serde(rename = "PNPDeviceID")]
    pnp_device_id: Option<String>,
    name: Option<String>,
    manufacturer: Option<String>,
    description: Option<String>,
    #[serde(rename = "HardwareID")]
    hardware_id: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_DiskDrive")]
struct Win32DiskDrive {
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
    #[serde(rename = "PNPDeviceID")]
    pnp_device_id: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_DiskPartition")]
struct Win32DiskPartition {
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
}

/// WMI-backed [`DeviceBackend`].
#[derive(Debug, Default)]
pub struct WmiBackend;

impl WmiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceBackend for WmiBackend {
    fn pnp_entities(&self) -> Result<Vec<PnpEntity>, DeviceError> {
        let rows: Vec<Win32PnPEntity> = with_connection("Win32_PnPEntity", |wmi| {
            wmi.raw_query(
                "SELECT PNPDeviceID, Name, Manufacturer, Description, HardwareID \
                 FROM Win32_PnPEntity WHERE PNPDeviceID LIKE 'USB%'",
            )
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(PnpEntity {
                    instance_id: row.pnp_device_id?,
                    name: row.name,
                    manufacturer: row.manufacturer,
                    description: row.description,
                    hardware_ids: row.hardware_id.unwrap_or_default(),
                })
            })
            .collect())
    }

    fn disk_drives(&self) -> Result<Vec<DiskDrive>, DeviceError> {
        let rows: Vec<Win32DiskDrive> = with_connection("Win32_DiskDrive", |wmi| {
            wmi.raw_query("SELECT DeviceID, PNPDeviceID FROM Win32_DiskDrive")
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(DiskDrive {
                    device_id: row.device_id?,
                    pnp_device_id: row.pnp_device_id,
                })
            })
            .collect())
    }

    fn partitions_of(&self, disk: &DiskDrive) -> Result<Vec<DiskPartition>, DeviceError> {
        let query = format!(
            "ASSOCIATORS OF {{Win32_DiskDrive.DeviceID='{}'}} \
             WHERE AssocClass = Win32_DiskDriveToDiskPartition",
            escape_wql(&disk.device_id)
        );
        debug!("WMI: {}", query);
        let rows: Vec<Win32DiskPartition> =
            with_connection("Win32_DiskDriveToDiskPartition", |wmi| wmi.raw_query(&query))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| Some(DiskPartition { device_id: row.device_id? }))
            .collect())
    }

    fn logical_disks_of(&self, partition: &DiskPartition) -> Result<Vec<LogicalDisk>, DeviceError> {
        let query = format!(
            "ASSOCIATORS OF {{Win32_DiskPartition.DeviceID='{}'}} \
             WHERE AssocClass = Win32_LogicalDiskToPartition",
            escape_wql(&partition.device_id)
        );
        debug!("WMI: {}", query);
        let rows: Vec<HashMap<String, Variant>> =
            with_connection("Win32_LogicalDiskToPartition", |wmi| wmi.raw_query(&query))?;

        // Size/FreeSpace are uint64, which WMI hands out as text.
        Ok(rows
            .iter()
            .map(|row| LogicalDisk {
                device_id: variant_text(row.get("DeviceID")),
                file_system: variant_text(row.get("FileSystem")),
                volume_name: variant_text(row.get("VolumeName")),
                size: variant_text(row.get("Size")),
                free_space: variant_text(row.get("FreeSpace")),
            })
            .collect())
    }

    fn request_eject(&self, instance_id: &str) -> Result<DeviceEjectResult, DeviceError> {
        eject::request_eject(instance_id, EjectTarget::for_instance(instance_id))
    }
}

/// Run `f` against this thread's WMI connection, opening it on first use.
fn with_connection<T>(
    what: &'static str,
    f: impl FnOnce(&WMIConnection) -> Result<T, wmi::WMIError>,
) -> Result<T, DeviceError> {
    CONNECTION.with(|cell| {
        let mut slot = cell.borrow_mut();
        let connection = match slot.take() {
            Some(c) => c,
            None => connect().map_err(|e| DeviceError::query(what, e.to_string()))?,
        };
        let result = f(&connection).map_err(|e| DeviceError::query(what, e.to_string()));
        *slot = Some(connection);
        result
    })
}

fn connect() -> Result<WMIConnection, wmi::WMIError> {
    let com = if COM_SECURITY_DONE.swap(true, Ordering::SeqCst) {
        COMLibrary::without_security()?
    } else {
        COMLibrary::new()?
    };
    debug!("WMI: opening connection on {:?}", std::thread::current().name());
    WMIConnection::new(com)
}

/// Escape a key value for use inside a single-quoted WQL literal.
fn escape_wql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn variant_text(value: Option<&Variant>) -> Option<String> {
    match value? {
        Variant::String(s) => Some(s.clone()),
        Variant::UI8(n) => Some(n.to_string()),
        Variant::I8(n) => Some(n.to_string()),
        Variant::UI4(n) => Some(n.to_string()),
        Variant::I4(n) => Some(n.to_string()),
        _ => None,
    }
}
