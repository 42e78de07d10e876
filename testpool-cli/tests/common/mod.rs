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

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;

/// Environment overrides that must never leak from the developer's shell
/// into a fixture run.
const CLEARED_ENV: &[&str] = &[
    "NWORKERS",
    "NWORKER_THREADS",
    "TESTITEM_TIMEOUT",
    "RETRIES",
    "MEMORY_THRESHOLD",
    "REPORT_LOCATION",
];

/// A throwaway project directory driven through the real binary.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("testpool-fixture-")
                .tempdir()
                .expect("cannot create fixture dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("cannot create fixture subdir");
        }
        std::fs::write(path, content).expect("cannot write fixture file");
        self
    }

    pub fn run(&self, args: &[&str]) -> RunOutput {
        let mut command = std::process::Command::new(env!("CARGO_BIN_EXE_testpool"));
        command.arg(self.root()).args(args).current_dir(self.root());
        for var in CLEARED_ENV {
            command.env_remove(var);
        }
        let output = command.output().expect("cannot run testpool");
        RunOutput { output }
    }

    /// Lines appended by `append` directives, used to observe evaluation
    /// counts and ordering.
    pub fn appended(&self, rel: &str) -> Vec<String> {
        match std::fs::read_to_string(self.path(rel)) {
            Ok(content) => content.lines().map(|l| l.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Content of the single JUnit report in `rel`, if any.
    pub fn report_xml(&self, rel: &str) -> Option<String> {
        let dir = self.path(rel);
        let entry = std::fs::read_dir(dir).ok()?.flatten().find(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("testpool-report-")
        })?;
        std::fs::read_to_string(entry.path()).ok()
    }
}

pub struct RunOutput {
    output: Output,
}

impl RunOutput {
    pub fn exit_code(&self) -> i32 {
        self.output.status.code().unwrap_or(-1)
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    /// Worker pids mentioned in RUNNING notices, in print order.
    pub fn running_worker_pids(&self) -> Vec<u32> {
        let pattern = regex::Regex::new(r"RUNNING .* on worker (\d+)").expect("bad regex");
        pattern
            .captures_iter(&self.stdout())
            .filter_map(|caps| caps[1].parse().ok())
            .collect()
    }

    pub fn distinct_worker_pids(&self) -> BTreeSet<u32> {
        self.running_worker_pids().into_iter().collect()
    }

    pub fn capture_block_count(&self, item_name: &str) -> usize {
        self.stdout()
            .matches(&format!("captured logs for \"{item_name}\""))
            .count()
    }
}
