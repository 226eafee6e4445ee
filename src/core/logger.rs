//! Optional JSON-lines record of structured deadlock reports.

use crate::core::types::DeadlockInfo;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Appends one serialized [`DeadlockInfo`] per line to a host-chosen file.
/// Runs on the dispatcher thread, never on a blocked application thread.
pub(crate) struct ReportLogger {
    file: Mutex<File>,
}

impl ReportLogger {
    pub(crate) fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open deadlock record file")?;
        Ok(ReportLogger {
            file: Mutex::new(file),
        })
    }

    /// Best effort: a full disk or revoked path must not take the detector
    /// down with it.
    pub(crate) fn append(&self, info: &DeadlockInfo) {
        if let Ok(json) = serde_json::to_string(info) {
            let mut file = self.file.lock();
            let _ = writeln!(file, "{json}");
            let _ = file.flush();
        }
    }
}
