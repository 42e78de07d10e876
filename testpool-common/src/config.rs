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

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "Testpool.toml";

pub const DEFAULT_TESTITEM_TIMEOUT_SECS: f64 = 1800.0;
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.99;
pub const DEFAULT_STALL_WARN_SECS: u64 = 600;

/// Environment variables recognized as overrides, mapped onto the config
/// field of the same name lowercased.
const ENV_OVERRIDES: &[&str] = &[
    "NWORKERS",
    "NWORKER_THREADS",
    "TESTITEM_TIMEOUT",
    "RETRIES",
    "MEMORY_THRESHOLD",
    "REPORT_LOCATION",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Load(#[from] figment::Error),
}

/// When captured per-item logs are shown on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDisplayMode {
    /// Stream live, no per-item capture files. Mutually exclusive with
    /// report generation: interleaved streams cannot be attributed to items.
    Eager,
    /// Print each item's captured logs right after it finishes.
    Batched,
    /// Print captured logs only for items whose final result is not a pass.
    Issues,
}

impl LogDisplayMode {
    /// The contextual default: eager for an interactive run with at most one
    /// worker, batched for interactive multi-worker, issues otherwise. When a
    /// report is requested the eager slot falls through to batched, because
    /// eager capture cannot feed the report.
    pub fn default_for(nworkers: usize, interactive: bool, report: bool) -> Self {
        if interactive && nworkers <= 1 && !report {
            LogDisplayMode::Eager
        } else if interactive {
            LogDisplayMode::Batched
        } else {
            LogDisplayMode::Issues
        }
    }
}

impl fmt::Display for LogDisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogDisplayMode::Eager => "eager",
            LogDisplayMode::Batched => "batched",
            LogDisplayMode::Issues => "issues",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LogDisplayMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eager" => Ok(LogDisplayMode::Eager),
            "batched" => Ok(LogDisplayMode::Batched),
            "issues" => Ok(LogDisplayMode::Issues),
            other => Err(ConfigError::Invalid(format!(
                "unknown log display mode '{other}', expected eager|batched|issues"
            ))),
        }
    }
}

/// Worker thread-pool sizing: `"auto"`, `"N"` or `"N,M"` where `M` sizes the
/// interactive (blocking) pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerThreads {
    Auto,
    Fixed { workers: usize, blocking: Option<usize> },
}

impl WorkerThreads {
    pub fn worker_count(&self) -> usize {
        match self {
            WorkerThreads::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            WorkerThreads::Fixed { workers, .. } => *workers,
        }
    }

    pub fn blocking_count(&self) -> Option<usize> {
        match self {
            WorkerThreads::Auto => None,
            WorkerThreads::Fixed { blocking, .. } => *blocking,
        }
    }
}

impl Default for WorkerThreads {
    fn default() -> Self {
        WorkerThreads::Fixed {
            workers: 1,
            blocking: None,
        }
    }
}

impl fmt::Display for WorkerThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerThreads::Auto => write!(f, "auto"),
            WorkerThreads::Fixed {
                workers,
                blocking: None,
            } => write!(f, "{workers}"),
            WorkerThreads::Fixed {
                workers,
                blocking: Some(blocking),
            } => write!(f, "{workers},{blocking}"),
        }
    }
}

impl FromStr for WorkerThreads {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WorkerThreads::Auto);
        }
        let invalid = || {
            ConfigError::Invalid(format!(
                "invalid nworker_threads '{s}', expected 'N', 'N,M' or 'auto'"
            ))
        };
        match s.split_once(',') {
            Some((workers, blocking)) => {
                let workers = workers.trim().parse().map_err(|_| invalid())?;
                let blocking = blocking.trim().parse().map_err(|_| invalid())?;
                if workers == 0 || blocking == 0 {
                    return Err(invalid());
                }
                Ok(WorkerThreads::Fixed {
                    workers,
                    blocking: Some(blocking),
                })
            }
            None => {
                let workers = s.parse().map_err(|_| invalid())?;
                if workers == 0 {
                    return Err(invalid());
                }
                Ok(WorkerThreads::Fixed {
                    workers,
                    blocking: None,
                })
            }
        }
    }
}

impl Serialize for WorkerThreads {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WorkerThreads {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Item name filter: exact string or regex matched as a substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameFilter {
    Exact(String),
    Pattern(String),
}

/// The full runner configuration, assembled from defaults, an optional
/// `Testpool.toml`, the environment overrides and the command line (in that
/// order, last writer wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Files or directories to discover test files under.
    pub paths: Vec<PathBuf>,
    /// Number of worker subprocesses; 0 evaluates in-process, serially and
    /// without timeout enforcement.
    pub nworkers: usize,
    pub nworker_threads: WorkerThreads,
    /// Opaque code evaluated once per worker at startup, after the host test
    /// environment is loaded.
    pub worker_init_expr: Option<String>,
    /// Opaque code evaluated after each item; errors are tolerated.
    pub test_end_expr: Option<String>,
    /// Per-item timeout in seconds; ignored when `nworkers = 0`.
    pub testitem_timeout: f64,
    /// Global retry ceiling; the per-item budget is `1 + max(retries, item)`.
    pub retries: u32,
    /// Host memory fraction above which the current worker is recycled
    /// before its next dispatch.
    pub memory_threshold: f64,
    /// Write a JUnit XML report.
    pub report: bool,
    /// Report directory; falls back to the project root.
    pub report_location: Option<PathBuf>,
    /// Explicit log display mode; `None` picks the contextual default.
    pub logs: Option<LogDisplayMode>,
    /// Expand every item in the final printed tree.
    pub verbose_results: bool,
    pub name: Option<NameFilter>,
    /// An item matches when its tag set is a superset of this.
    pub tags: BTreeSet<String>,
    /// Refuse unknown top-level annotations in test files.
    pub strict: bool,
    /// Soft stall threshold; prints a diagnostic notice, never retries.
    pub stall_warn_secs: u64,
    /// Issue an advisory GC hint to the worker between items.
    pub gc_between_items: bool,
    pub project_name: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from(".")],
            nworkers: 0,
            nworker_threads: WorkerThreads::default(),
            worker_init_expr: None,
            test_end_expr: None,
            testitem_timeout: DEFAULT_TESTITEM_TIMEOUT_SECS,
            retries: 0,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            report: false,
            report_location: None,
            logs: None,
            verbose_results: false,
            name: None,
            tags: BTreeSet::new(),
            strict: true,
            stall_warn_secs: DEFAULT_STALL_WARN_SECS,
            gc_between_items: true,
            project_name: None,
        }
    }
}

impl RunnerConfig {
    /// Loads the effective configuration. `overrides` is typically the
    /// serialized CLI argument set with unset options skipped, so the
    /// precedence ends up defaults < Testpool.toml < environment < CLI.
    pub fn load(overrides: impl Serialize) -> Result<Self, ConfigError> {
        let config: RunnerConfig = Figment::from(Serialized::defaults(RunnerConfig::default()))
            .merge(Toml::file(CONFIG_FILE_NAME))
            .merge(
                Env::raw()
                    .only(ENV_OVERRIDES)
                    .map(|key| key.as_str().to_ascii_lowercase().into()),
            )
            .merge(Serialized::defaults(overrides))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(ConfigError::Invalid(format!(
                "memory_threshold must be within [0, 1], got {}",
                self.memory_threshold
            )));
        }
        if !self.testitem_timeout.is_finite() || self.testitem_timeout <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "testitem_timeout must be a positive number of seconds, got {}",
                self.testitem_timeout
            )));
        }
        if self.report && self.logs == Some(LogDisplayMode::Eager) {
            return Err(ConfigError::Invalid(
                "logs=eager cannot be combined with report generation; \
                 eagerly streamed output cannot be attributed to items"
                    .to_string(),
            ));
        }
        if let Some(NameFilter::Pattern(pattern)) = &self.name
            && pattern.is_empty()
        {
            return Err(ConfigError::Invalid(
                "name pattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The log display mode in effect for this run.
    pub fn log_mode(&self, interactive: bool) -> LogDisplayMode {
        self.logs
            .unwrap_or_else(|| LogDisplayMode::default_for(self.nworkers, interactive, self.report))
    }
}
