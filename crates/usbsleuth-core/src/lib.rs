/// UsbSleuth Core — device enumeration, volume correlation, and change watching.
///
/// This crate contains all business logic with zero UI dependencies.
/// It is designed to be reusable across different frontends (GUI, CLI, TUI).
///
/// # Modules
///
/// - [`model`] — Immutable device, volume and eject-result value types.
/// - [`platform`] — OS capability interfaces plus the Windows, in-memory and
///   unsupported-target adapters that implement them.
/// - [`device`] — Base and storage device directories (cached scans).
/// - [`watcher`] — Background listener for volume arrival/removal events.
/// - [`error`] — The shared [`DeviceError`] type.
pub mod device;
pub mod error;
pub mod model;
pub mod platform;
pub mod watcher;

pub use error::DeviceError;
