//! Error types for the charger link
//!
//! This module defines the error types used throughout the library
//! for adapter I/O, link lifecycle and frame decoding failures.

use thiserror::Error;

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Error types for link operations
#[derive(Error, Debug)]
pub enum LinkError {
    /// Adapter could not be opened (bad index, busy device, driver error)
    #[error("Failed to open CAN device {index}: {reason}")]
    DeviceOpenFailed { index: usize, reason: String },

    /// Adapter reported an error while closing
    #[error("Failed to close CAN device: {0}")]
    DeviceCloseFailed(String),

    /// No adapter at the requested index
    #[error("No CAN device at index {0}")]
    DeviceNotFound(usize),

    /// Link is not open
    #[error("CAN link is not open")]
    NotOpen,

    /// Link was closed while the operation was in flight
    #[error("CAN link closed during operation")]
    Closed,

    /// No frame arrived within the read timeout
    #[error("Read timeout")]
    ReadTimeout,

    /// Adapter read failure
    #[error("Read failed: {0}")]
    Read(String),

    /// Adapter write failure
    #[error("Write failed: {0}")]
    Write(String),

    /// Payload too short for the matched identifier
    #[error("Malformed frame: expected at least {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    /// Bitrate not supported for the adapter clock
    #[error("Unsupported bitrate {bitrate} for clock {clock_hz} Hz")]
    UnsupportedBitrate { bitrate: u32, clock_hz: u32 },

    /// USB error from the rusb library
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Shutdown has been signalled
    #[error("Charger is shutting down")]
    Terminated,
}

impl LinkError {
    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LinkError::ReadTimeout | LinkError::Usb(rusb::Error::Timeout)
        )
    }

    /// Check if this error means the link is (or is going) away
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            LinkError::NotOpen | LinkError::Closed | LinkError::Terminated
        )
    }
}
