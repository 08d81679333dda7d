//! Production transports that shell out to `ipmitool` and `nvme`.
//!
//! These are thin and deliberately untested against real hardware — the
//! rest of the workspace is exercised against [`crate::testing`]'s fakes.

use crate::Result;
use sf_error::SuperfanError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::{BmcTransport, NvmeTransport};

/// Connection parameters for a local or remote `ipmitool` invocation.
#[derive(Debug, Clone)]
pub struct LocalBmcTransport {
    host: String,
    username: String,
    password: String,
    interface: String,
}

impl LocalBmcTransport {
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            username: "ADMIN".to_string(),
            password: "ADMIN".to_string(),
            interface: "lanplus".to_string(),
        }
    }

    pub fn remote(host: String, username: String, password: String, interface: String) -> Self {
        Self {
            host,
            username,
            password,
            interface,
        }
    }

    /// Build from the `ipmi.*` configuration contract fields directly,
    /// matching `spec.md` §6's `ipmi.{host,username,password,interface}`.
    pub fn new(interface: &str, host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            interface: interface.to_string(),
        }
    }
}

impl BmcTransport for LocalBmcTransport {
    fn execute(&self, command: &str) -> Result<String> {
        let mut args: Vec<String> = Vec::new();
        if self.host != "localhost" {
            args.extend([
                "-I".to_string(),
                self.interface.clone(),
                "-H".to_string(),
                self.host.clone(),
                "-U".to_string(),
                self.username.clone(),
                "-P".to_string(),
                self.password.clone(),
            ]);
        }
        args.extend(command.split_whitespace().map(str::to_string));

        debug!(command, "executing ipmitool command");
        let output = Command::new("ipmitool")
            .args(&args)
            .output()
            .map_err(|e| SuperfanError::ConnectionLost(e.to_string()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.contains("Device or resource busy") {
            Err(SuperfanError::DeviceBusy(stderr))
        } else if stderr.contains("Error in open session") || stderr.contains("Unable to establish") {
            Err(SuperfanError::ConnectionLost(stderr))
        } else {
            Err(SuperfanError::CommandFailed(stderr))
        }
    }
}

/// Enumerates NVMe namespace devices under `/dev` and reads SMART logs via
/// `nvme smart-log`.
#[derive(Debug, Clone, Default)]
pub struct LocalNvmeTransport;

impl LocalNvmeTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NvmeTransport for LocalNvmeTransport {
    fn list(&self) -> Result<Vec<PathBuf>> {
        let mut devices = Vec::new();
        let entries = std::fs::read_dir("/dev")
            .map_err(|e| SuperfanError::NvmeTransport(e.to_string()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_nvme_namespace(&name) {
                devices.push(entry.path());
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn smart_log(&self, path: &Path) -> Result<String> {
        let output = Command::new("nvme")
            .arg("smart-log")
            .arg(path)
            .output()
            .map_err(|e| SuperfanError::NvmeTransport(e.to_string()))?;

        if !output.status.success() {
            return Err(SuperfanError::NvmeTransport(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Matches the `nvmeNnM` namespace block-device naming convention.
fn is_nvme_namespace(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("nvme") else {
        return false;
    };
    let Some(n_pos) = rest.find('n') else {
        return false;
    };
    let (controller, namespace) = rest.split_at(n_pos);
    !controller.is_empty()
        && controller.chars().all(|c| c.is_ascii_digit())
        && namespace.len() > 1
        && namespace[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_namespace_devices() {
        assert!(is_nvme_namespace("nvme0n1"));
        assert!(is_nvme_namespace("nvme1n2"));
        assert!(!is_nvme_namespace("nvme0"));
        assert!(!is_nvme_namespace("sda1"));
    }
}
