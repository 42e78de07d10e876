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

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Stable identifier of a test item, unique across one run.
///
/// Discovery derives it from the item's file and name unless the annotation
/// carries an explicit `id=` key. Retry bookkeeping and report generation
/// both key on it, which is why duplicates are rejected before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestItemId(pub String);

impl TestItemId {
    pub fn derived(file: &str, name: &str) -> Self {
        Self(format!("{file}::{name}"))
    }
}

impl fmt::Display for TestItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque code value passed from the discovery site to the worker's host
/// evaluator. The coordinator never interprets `text`; it only ships it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSource {
    pub text: String,
    pub file: PathBuf,
    pub line: u32,
}

impl CodeSource {
    pub fn new(text: impl Into<String>, file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            text: text.into(),
            file: file.into(),
            line,
        }
    }

    /// An anonymous fragment with no originating file, used for expressions
    /// coming from the command line (worker init, GC hints, test-end hooks).
    pub fn anonymous(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: PathBuf::from("<expr>"),
            line: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
    pub default_imports: bool,
    pub skip: bool,
    pub failfast: bool,
}

impl Default for ItemFlags {
    fn default() -> Self {
        Self {
            default_imports: true,
            skip: false,
            failfast: false,
        }
    }
}

/// One annotated unit of work. Immutable after discovery except for the two
/// runtime slots (`worker_pid`, `eval_number`) the scheduler fills while the
/// item is being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestItem {
    pub id: TestItemId,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub project_root: PathBuf,
    pub code: CodeSource,
    /// Required setups, in evaluation order.
    pub setups: Vec<String>,
    pub tags: BTreeSet<String>,
    pub flags: ItemFlags,
    /// Per-item retry ceiling; the effective budget is
    /// `1 + max(global_retries, retries)`.
    pub retries: u32,
    /// Per-item timeout override.
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Pid of the worker the item is currently assigned to.
    pub worker_pid: Option<u32>,
    /// Monotonically increasing evaluation number (1-based run number).
    pub eval_number: u32,
}

/// A named initialization block one or more items depend on. Its code is
/// evaluated at most once per worker; the worker-keyed log sink path is
/// assigned at dispatch time and lives in the wire request, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSetup {
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub code: CodeSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionStatus {
    Pass,
    Fail,
    Error,
}

/// Leaf of the per-evaluation outcome tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub status: AssertionStatus,
    pub message: Option<String>,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
}

impl AssertionOutcome {
    pub fn pass() -> Self {
        Self {
            status: AssertionStatus::Pass,
            message: None,
            file: None,
            line: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: AssertionStatus::Fail,
            message: Some(message.into()),
            file: None,
            line: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AssertionStatus::Error,
            message: Some(message.into()),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<PathBuf>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// Performance statistics of one evaluation, all time values in seconds.
///
/// Counters the host cannot observe stay at zero; the fields are kept so a
/// richer host can fill them without a wire change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfStats {
    pub elapsed_secs: f64,
    pub allocated_bytes: u64,
    pub allocation_count: u64,
    pub gc_secs: f64,
    pub compile_secs: f64,
    pub recompile_secs: f64,
}

impl PerfStats {
    pub fn elapsed(elapsed: Duration) -> Self {
        Self {
            elapsed_secs: elapsed.as_secs_f64(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pass,
    Fail,
    Error,
}

impl ItemStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, ItemStatus::Pass)
    }
}

/// The result of one evaluation of one item, as produced by a worker (or
/// synthesized by the coordinator for timeouts and crashes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// 1-based attempt counter at which this result was produced.
    pub run_number: u32,
    pub outcomes: Vec<AssertionOutcome>,
    pub stats: PerfStats,
}

impl TestResult {
    pub fn from_error(run_number: u32, message: impl Into<String>, stats: PerfStats) -> Self {
        Self {
            run_number,
            outcomes: vec![AssertionOutcome::error(message)],
            stats,
        }
    }

    /// Errors dominate failures; an evaluation with no recorded assertions
    /// counts as a pass.
    pub fn status(&self) -> ItemStatus {
        let mut status = ItemStatus::Pass;
        for outcome in &self.outcomes {
            match outcome.status {
                AssertionStatus::Error => return ItemStatus::Error,
                AssertionStatus::Fail => status = ItemStatus::Fail,
                AssertionStatus::Pass => {}
            }
        }
        status
    }

    pub fn count(&self, status: AssertionStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// How one evaluation concluded, as observed by the coordinator. `Completed`
/// covers both passes and ordinary non-passes; the other two are synthesized
/// when no result came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunKind {
    Completed,
    Timeout { seconds: f64 },
    WorkerAborted { signal: Option<i32> },
}

/// One recorded run of one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub result: TestResult,
    pub kind: RunKind,
    pub worker_pid: Option<u32>,
}

impl RunRecord {
    pub fn status(&self) -> ItemStatus {
        self.result.status()
    }
}

pub fn timeout_message(name: &str, seconds: f64, run_number: u32) -> String {
    format!("Timed out after {seconds}s evaluating test item \"{name}\" (run={run_number})")
}

pub fn abort_message(name: &str, signal: Option<i32>, run_number: u32) -> String {
    match signal {
        Some(signal) => format!(
            "Worker process aborted (signal={signal}) evaluating test item \"{name}\" (run={run_number})"
        ),
        None => format!(
            "Worker process aborted evaluating test item \"{name}\" (run={run_number})"
        ),
    }
}

pub fn setup_error_message(setup: &str, error: &str) -> String {
    format!("Error during setup \"{setup}\": {error}")
}
