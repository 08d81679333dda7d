//! BMC and NVMe transport abstractions (C1, C2)
//!
//! These traits are the seam between the rest of the daemon and whatever
//! actually talks to the hardware. Production code shells out to
//! `ipmitool`/`nvme-cli`; tests substitute an in-memory fake from
//! [`testing`] so the rest of the workspace never needs real hardware.

mod local;
pub mod raw;
pub mod testing;

pub use local::{LocalBmcTransport, LocalNvmeTransport};
pub use raw::RawCommand;

use sf_error::SuperfanError;
use std::path::PathBuf;

/// Result specialization matching the transport layer's error surface.
pub type Result<T> = std::result::Result<T, SuperfanError>;

/// Executes raw BMC command strings.
///
/// Per spec.md §4.1: the command string is whitespace-tokenized; a leading
/// `raw` token denotes a raw-byte-sequence command (validated upstream by
/// the command validator); all other tokens pass through unchanged.
pub trait BmcTransport: Send + Sync {
    /// Execute `command` and return its stdout, trimmed.
    fn execute(&self, command: &str) -> Result<String>;
}

/// Enumerates NVMe devices and reads their SMART logs.
pub trait NvmeTransport: Send + Sync {
    /// List namespace block device paths (e.g. `/dev/nvme0n1`).
    fn list(&self) -> Result<Vec<PathBuf>>;

    /// Read the raw `nvme smart-log` text for one device.
    fn smart_log(&self, path: &std::path::Path) -> Result<String>;
}
