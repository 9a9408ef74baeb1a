/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Linux sysfs GPIO backend.
//!
//! Each channel maps to one GPIO line under `/sys/class/gpio`.  Opening the
//! driver exports the lines (if not already exported), configures them as
//! outputs driven low, and keeps the path of each `value` attribute.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ActuationFault;
use crate::output::{Channel, OutputDriver};

/// Default sysfs GPIO class directory.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// A single exported GPIO line.
#[derive(Debug, Clone)]
struct Line {
    number: u32,
    value: PathBuf,
}

/// Relay outputs backed by sysfs GPIO lines.
#[derive(Debug)]
pub struct SysfsGpio {
    lines: [Line; 2],
}

impl SysfsGpio {
    /// Export and configure `start_line` / `end_line` under `root`.
    ///
    /// # Errors
    /// Returns [`ActuationFault::Io`] if a line cannot be exported or its
    /// direction cannot be set.
    pub fn open(root: &Path, start_line: u32, end_line: u32) -> Result<Self, ActuationFault> {
        let start = Self::prepare(root, Channel::Start, start_line)?;
        let end = Self::prepare(root, Channel::End, end_line)?;
        info!(
            root = %root.display(),
            start_line,
            end_line,
            "sysfs GPIO outputs configured"
        );
        Ok(Self { lines: [start, end] })
    }

    fn prepare(root: &Path, channel: Channel, number: u32) -> Result<Line, ActuationFault> {
        let io = |source| ActuationFault::Io {
            channel,
            line: number,
            source,
        };

        let dir = root.join(format!("gpio{number}"));
        if !dir.exists() {
            debug!(line = number, "exporting GPIO line");
            fs::write(root.join("export"), number.to_string()).map_err(io)?;
        }

        // "low" sets the direction to output with an initial level of 0.
        fs::write(dir.join("direction"), "low").map_err(io)?;

        Ok(Line {
            number,
            value: dir.join("value"),
        })
    }
}

impl OutputDriver for SysfsGpio {
    fn set(&self, channel: Channel, asserted: bool) -> Result<(), ActuationFault> {
        let line = &self.lines[channel.index()];
        fs::write(&line.value, if asserted { "1" } else { "0" }).map_err(|source| {
            ActuationFault::Io {
                channel,
                line: line.number,
                source,
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs tree with both lines already exported.
    fn fake_sysfs(lines: &[u32]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for n in lines {
            fs::create_dir_all(dir.path().join(format!("gpio{n}"))).unwrap();
        }
        dir
    }

    fn read(dir: &TempDir, line: u32, attr: &str) -> String {
        fs::read_to_string(dir.path().join(format!("gpio{line}")).join(attr)).unwrap()
    }

    #[test]
    fn open_configures_lines_as_low_outputs() {
        let dir = fake_sysfs(&[18, 23]);
        SysfsGpio::open(dir.path(), 18, 23).unwrap();
        assert_eq!(read(&dir, 18, "direction"), "low");
        assert_eq!(read(&dir, 23, "direction"), "low");
    }

    #[test]
    fn set_writes_value_attribute() {
        let dir = fake_sysfs(&[18, 23]);
        let gpio = SysfsGpio::open(dir.path(), 18, 23).unwrap();

        gpio.set(Channel::End, true).unwrap();
        assert_eq!(read(&dir, 23, "value"), "1");

        gpio.set(Channel::End, false).unwrap();
        assert_eq!(read(&dir, 23, "value"), "0");
    }

    #[test]
    fn unexported_line_is_exported() {
        let dir = fake_sysfs(&[23]);
        // The real kernel creates gpio18/ in response to the export write;
        // here the export succeeds but the directory never appears.
        let result = SysfsGpio::open(dir.path(), 18, 23);
        assert_eq!(
            fs::read_to_string(dir.path().join("export")).unwrap(),
            "18"
        );
        assert!(matches!(
            result,
            Err(ActuationFault::Io { line: 18, channel: Channel::Start, .. })
        ));
    }
}
