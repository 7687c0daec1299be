/// Error type shared by the directories, adapters and state managers.
///
/// Errors are cloneable so they can be stored inside published state
/// snapshots and handed to any number of observers.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The requested instance id is not part of the current snapshot.
    #[error("USB device not found: {0}")]
    NotFound(String),

    /// An OS enumeration call itself failed.
    #[error("{what} query failed: {message}")]
    Query {
        /// The OS object class or API that was being queried.
        what: &'static str,
        message: String,
    },

    /// The ejection request could not be issued at all.
    ///
    /// Refusals by the OS (device busy, veto) are *not* errors; they are
    /// reported as an unsuccessful `DeviceEjectResult`.
    #[error("eject failed: {0}")]
    Eject(String),

    /// Device enumeration is not available on this platform.
    #[error("USB device enumeration is only supported on Windows")]
    Unsupported,

    /// A background worker could not be started or terminated abnormally.
    #[error("worker error: {0}")]
    Worker(String),
}

impl DeviceError {
    /// Shorthand for a [`DeviceError::Query`].
    pub fn query(what: &'static str, message: impl Into<String>) -> Self {
        Self::Query {
            what,
            message: message.into(),
        }
    }

    /// `true` for [`DeviceError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
