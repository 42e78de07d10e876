// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-run capture directory: item sinks, setup sinks and worker socket
//! paths all live in one temp dir that disappears with the run.
//!
//! Item sinks are keyed by item id alone — a retry reuses the path and the
//! worker opens it truncating, so the file always holds the last run's
//! output. Setup sinks are keyed by (setup, worker pid) because one setup
//! serves many items on the same worker but re-evaluates on a replacement.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use testpool_common::model::TestItemId;

pub struct CaptureDir {
    dir: TempDir,
}

impl CaptureDir {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("testpool-run-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn item_log_path(&self, id: &TestItemId) -> PathBuf {
        self.dir.path().join(format!("item-{}.log", sanitize(&id.0)))
    }

    pub fn setup_log_path(&self, setup: &str, worker_pid: u32) -> PathBuf {
        self.dir
            .path()
            .join(format!("setup-{}-{worker_pid}.log", sanitize(setup)))
    }

    /// Socket the worker in `slot` connects back to; `generation` increments
    /// on every replacement so a stale child can never race a fresh bind.
    pub fn socket_path(&self, slot: usize, generation: u64) -> PathBuf {
        self.dir
            .path()
            .join(format!("worker-{slot}-{generation}.sock"))
    }

    /// Captured bytes, presented verbatim; `None` when nothing was written.
    pub fn read_log(path: &Path) -> Option<String> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => None,
        }
    }

    /// The trailing portion of a capture, for stall diagnostics.
    pub fn read_log_tail(path: &Path, max_lines: usize) -> Option<String> {
        let content = Self::read_log(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        Some(lines[start..].join("\n"))
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
