/// Size formatting utilities — human-readable byte counts for volume capacities.
///
/// All internal sizes are `u64` bytes. Floating point is only used
/// at the display-formatting boundary.

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Step between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeSystem {
    /// 1024 per step, labelled KB/MB/GB because that is what users expect
    /// from Explorer.
    #[default]
    Binary,
    /// 1000 per step, as printed on the packaging.
    Decimal,
}

impl SizeSystem {
    fn base(self) -> f64 {
        match self {
            Self::Binary => 1024.0,
            Self::Decimal => 1000.0,
        }
    }
}

/// A byte count scaled to a display unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeParts {
    /// Raw byte count (absent input counts as 0).
    pub bytes: u64,
    /// Value in `unit`, already rounded.
    pub value: f64,
    pub unit: &'static str,
}

/// Scale `bytes` to the largest unit whose value is still >= 1.
///
/// `decimals = None` picks automatically: none for plain bytes, one below 10,
/// none otherwise.
pub fn to_size_parts(bytes: Option<u64>, system: SizeSystem, decimals: Option<u32>) -> SizeParts {
    let raw = bytes.unwrap_or(0);
    let base = system.base();

    let mut unit_index = 0;
    let mut value = raw as f64;
    while unit_index < UNITS.len() - 1 && value >= base {
        value /= base;
        unit_index += 1;
    }

    let decimals = decimals.unwrap_or(if unit_index == 0 || value >= 10.0 {
        0
    } else {
        1
    });
    // Half-way values round to even: 1.25 KB -> 1.2 KB, 1.75 KB -> 1.8 KB.
    let scale = 10f64.powi(decimals as i32);
    let value = (value * scale).round_ties_even() / scale;

    SizeParts {
        bytes: raw,
        value,
        unit: UNITS[unit_index],
    }
}

/// Format a byte count, e.g. `"1.5 KB"`; a trailing `.0` is dropped.
pub fn format_size(bytes: Option<u64>, system: SizeSystem, decimals: Option<u32>) -> String {
    let parts = to_size_parts(bytes, system, decimals);
    if parts.unit == "B" {
        return format!("{} B", parts.bytes);
    }

    let text = parts.value.to_string();
    let text = text.strip_suffix(".0").unwrap_or(&text);
    format!("{text} {}", parts.unit)
}

/// Format with the binary system and automatic precision, `"-"` when absent.
pub fn format_optional(bytes: Option<u64>) -> String {
    match bytes {
        Some(_) => format_size(bytes, SizeSystem::Binary, None),
        None => "-".to_string(),
    }
}
