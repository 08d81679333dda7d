//! In-memory fake transports used by every other crate's test suite.
//!
//! Grounded on the workspace convention of keeping hand-rolled test doubles
//! next to the trait they implement rather than pulling in a mocking
//! framework, since both transports are small enough that a queue of
//! canned responses is clearer than a generated mock.

use crate::{BmcTransport, NvmeTransport, Result};
use parking_lot::Mutex;
use sf_error::SuperfanError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// A scripted [`BmcTransport`] that returns queued responses (or a default)
/// keyed by the exact command string, and records every command it saw.
#[derive(Default)]
pub struct FakeBmcTransport {
    responses: Mutex<std::collections::HashMap<String, VecDeque<Result<String>>>>,
    default_response: Mutex<Option<Result<String>>>,
    history: Mutex<Vec<String>>,
}

impl FakeBmcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an exact command string; subsequent calls with
    /// the same string drain the queue in FIFO order.
    pub fn push_response(&self, command: impl Into<String>, response: Result<String>) {
        self.responses
            .lock()
            .entry(command.into())
            .or_default()
            .push_back(response);
    }

    pub fn push_ok(&self, command: impl Into<String>, output: impl Into<String>) {
        self.push_response(command, Ok(output.into()));
    }

    /// Set the response returned when no queued entry matches the command.
    pub fn set_default(&self, response: Result<String>) {
        *self.default_response.lock() = Some(response);
    }

    pub fn commands_seen(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.history.lock().iter().filter(|c| *c == command).count()
    }
}

impl BmcTransport for FakeBmcTransport {
    fn execute(&self, command: &str) -> Result<String> {
        self.history.lock().push(command.to_string());

        if let Some(queue) = self.responses.lock().get_mut(command) {
            if let Some(resp) = queue.pop_front() {
                return resp;
            }
        }

        match self.default_response.lock().clone() {
            Some(resp) => resp,
            None => Err(SuperfanError::CommandFailed(format!(
                "no canned response for `{command}`"
            ))),
        }
    }
}

/// A fake [`NvmeTransport`] backed by an in-memory device list and SMART
/// log texts.
#[derive(Default)]
pub struct FakeNvmeTransport {
    devices: Mutex<Vec<PathBuf>>,
    logs: Mutex<std::collections::HashMap<PathBuf, String>>,
}

impl FakeNvmeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, path: impl Into<PathBuf>, smart_log: impl Into<String>) {
        let path = path.into();
        self.devices.lock().push(path.clone());
        self.logs.lock().insert(path, smart_log.into());
    }
}

impl NvmeTransport for FakeNvmeTransport {
    fn list(&self) -> Result<Vec<PathBuf>> {
        Ok(self.devices.lock().clone())
    }

    fn smart_log(&self, path: &Path) -> Result<String> {
        self.logs
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SuperfanError::NvmeTransport(format!("no log for {path:?}")))
    }
}
