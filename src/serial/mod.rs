//! Serial device access
//!
//! [`SerialReader`] owns the device handle and turns its byte stream into
//! [`RawLine`](crate::protocol::RawLine)s. The bridge consumes it through the
//! [`LineSource`] trait so tests can substitute scripted sources.

pub mod reader;

pub use reader::{LineSource, SerialReader};

use thiserror::Error;

/// Serial read errors, split by how the bridge must react
///
/// `Open` and `DeviceClosed` fault the bridge, `ReadFailure` is retried a
/// bounded number of times and `Malformed` lines are skipped.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The device could not be acquired at startup
    #[error("Failed to open serial device {device}: {reason}")]
    Open { device: String, reason: String },
    /// The handle is gone, e.g. the board was unplugged
    #[error("Serial device closed")]
    DeviceClosed,
    /// The read failed but the handle may still be usable
    #[error("Serial read failed")]
    ReadFailure(#[source] std::io::Error),
    /// A line arrived but is unusable
    #[error("Malformed serial line {raw:?}: {reason}")]
    Malformed { raw: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SerialError::Open {
            device: "/dev/cu.usbmodem1201".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open serial device /dev/cu.usbmodem1201: No such file or directory"
        );
    }
}
