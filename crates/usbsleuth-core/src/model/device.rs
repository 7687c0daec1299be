/// Device value types shared by the directories, state managers and front ends.
///
/// Every type here is created fresh on each scan and never mutated after
/// construction; a rescan produces new values rather than patching old ones.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::LazyLock;

static VID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)VID_([0-9A-F]{4})").expect("valid VID pattern"));
static PID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PID_([0-9A-F]{4})").expect("valid PID pattern"));

/// Opaque OS instance identifier of a physical device, e.g.
/// `USB\VID_0781&PID_5567\4C530001230517115423`.
///
/// Equality is exact-string. Listings sort case-insensitively via
/// [`sort_device_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self(instance_id.into())
    }

    /// The raw instance identifier string.
    pub fn instance_id(&self) -> &str {
        &self.0
    }

    /// Case-insensitive ordering used by every directory listing.
    pub fn cmp_casefold(&self, other: &Self) -> Ordering {
        casefold_cmp(&self.0, &other.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Device-class prefix of USB mass-storage instance and hardware ids.
pub const MASS_STORAGE_PREFIX: &str = "USBSTOR\\";

/// `true` when `id` starts with [`MASS_STORAGE_PREFIX`] (case-insensitive).
pub fn has_mass_storage_prefix(id: &str) -> bool {
    id.get(..MASS_STORAGE_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(MASS_STORAGE_PREFIX))
}

/// Sort ids by identifier, case-insensitive, ascending (stable).
pub fn sort_device_ids(ids: &mut [DeviceId]) {
    ids.sort_by(DeviceId::cmp_casefold);
}

pub(crate) fn casefold_cmp(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Identity and descriptive metadata of one USB plug-and-play device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDeviceInfo {
    pub id: DeviceId,
    /// Four uppercase hex digits, e.g. `"0781"`.
    pub vendor_id: Option<String>,
    /// Four uppercase hex digits, e.g. `"5567"`.
    pub product_id: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Falls back to the product name when the OS reports no description.
    pub description: Option<String>,
    /// Third segment of the instance id.
    ///
    /// Not guaranteed to be a real serial number: composite devices and hubs
    /// report a topology/location string in this position instead.
    pub serial_number: Option<String>,
}

impl BaseDeviceInfo {
    /// An info record carrying only the id.
    pub fn bare(id: DeviceId) -> Self {
        Self {
            id,
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            product: None,
            description: None,
            serial_number: None,
        }
    }

    /// Best human-readable name: product, then description, then the raw id.
    pub fn display_name(&self) -> &str {
        self.product
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or(self.id.instance_id())
    }
}

/// One mounted logical volume on a storage device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Short mount designator such as `"E:"`.
    pub drive_letter: Option<String>,
    /// Root path derived from the drive letter, e.g. `E:\`.
    pub mount_path: Option<PathBuf>,
    pub file_system: Option<String>,
    pub volume_label: Option<String>,
    /// Absent (not zero) when the OS value was empty or malformed.
    pub total_bytes: Option<u64>,
    /// Absent (not zero) when the OS value was empty or malformed.
    pub free_bytes: Option<u64>,
}

impl VolumeInfo {
    /// Ordering within a device: drive letter, case-insensitive, missing first.
    pub fn cmp_by_drive_letter(&self, other: &Self) -> Ordering {
        casefold_cmp(
            self.drive_letter.as_deref().unwrap_or(""),
            other.drive_letter.as_deref().unwrap_or(""),
        )
    }
}

/// Derive the mount path for a drive designator (`"E:"` → `E:\`).
pub fn mount_path_for(drive_letter: &str) -> PathBuf {
    PathBuf::from(format!("{drive_letter}\\"))
}

/// A storage-classified device together with its resolved volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDeviceInfo {
    pub base: BaseDeviceInfo,
    /// Possibly empty; sorted by [`VolumeInfo::cmp_by_drive_letter`].
    pub volumes: Vec<VolumeInfo>,
}

impl StorageDeviceInfo {
    pub fn new(base: BaseDeviceInfo, volumes: Vec<VolumeInfo>) -> Self {
        Self { base, volumes }
    }

    pub fn id(&self) -> &DeviceId {
        &self.base.id
    }
}

/// Outcome of one ejection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEjectResult {
    pub success: bool,
    /// Recorded even on failure, for diagnostics.
    pub attempted_instance_id: String,
    /// Raw platform status code (`CONFIGRET` on Windows). 0 is success;
    /// nonzero codes are opaque and passed through untouched.
    pub config_ret: u32,
}

/// One element of an aggregated device listing.
///
/// A device is `Storage` exactly when it is storage-classified *and* its
/// storage detail was retrievable this cycle; otherwise it degrades to `Base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceEntry {
    Base(BaseDeviceInfo),
    Storage(StorageDeviceInfo),
}

impl DeviceEntry {
    pub fn id(&self) -> &DeviceId {
        &self.base().id
    }

    pub fn base(&self) -> &BaseDeviceInfo {
        match self {
            Self::Base(base) => base,
            Self::Storage(storage) => &storage.base,
        }
    }

    pub fn as_storage(&self) -> Option<&StorageDeviceInfo> {
        match self {
            Self::Storage(storage) => Some(storage),
            Self::Base(_) => None,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Identifier fields recovered from a USB instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUsbIds {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub serial_number: Option<String>,
}

/// Parse vendor/product ids and the (heuristic) serial from an instance id.
///
/// Typical shape: `USB\VID_XXXX&PID_YYYY\<serial or location>`.
pub fn parse_usb_ids(instance_id: &str) -> ParsedUsbIds {
    let capture = |pattern: &Regex| {
        pattern
            .captures(instance_id)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
    };

    let parts: Vec<&str> = instance_id.split('\\').collect();
    let serial_number = match parts.last() {
        Some(last) if parts.len() >= 3 && !last.is_empty() => Some((*last).to_string()),
        _ => None,
    };

    ParsedUsbIds {
        vendor_id: capture(&VID_PATTERN),
        product_id: capture(&PID_PATTERN),
        serial_number,
    }
}
