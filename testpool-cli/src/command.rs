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

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use testpool_common::config::{ConfigError, LogDisplayMode, NameFilter, WorkerThreads};

#[derive(Debug, Parser)]
#[command(
    name = "testpool",
    about = "Parallel, fault-tolerant runner for annotated test items",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Internal entry point: the coordinator re-executes this binary as a
    /// worker subprocess that connects back on the given socket.
    #[command(name = "__worker", hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    #[arg(long)]
    pub socket: PathBuf,
    #[arg(long, default_value = "testpool")]
    pub project_name: String,
    #[arg(long, default_value = "1")]
    pub threads: String,
    #[arg(long, default_value = "0")]
    pub total_items: usize,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Files or directories to discover test files under (default: ".").
    pub paths: Vec<PathBuf>,

    /// Number of worker subprocesses; 0 evaluates in-process, serially and
    /// without timeout enforcement.
    #[arg(long)]
    pub nworkers: Option<usize>,

    /// Worker thread-pool size: "N", "N,M" or "auto".
    #[arg(long)]
    pub nworker_threads: Option<String>,

    /// Code evaluated once per worker at startup.
    #[arg(long)]
    pub worker_init_expr: Option<String>,

    /// Code evaluated after each test item.
    #[arg(long)]
    pub test_end_expr: Option<String>,

    /// Per-item timeout in seconds.
    #[arg(long)]
    pub testitem_timeout: Option<f64>,

    /// Global retry ceiling.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Host memory fraction above which workers are recycled.
    #[arg(long)]
    pub memory_threshold: Option<f64>,

    /// Write a JUnit XML report.
    #[arg(long)]
    pub report: bool,

    /// Directory for the JUnit report (default: the project root).
    #[arg(long)]
    pub report_location: Option<PathBuf>,

    /// Log display mode: eager, batched or issues.
    #[arg(long)]
    pub logs: Option<String>,

    /// Expand every item in the final printed tree.
    #[arg(long)]
    pub verbose_results: bool,

    /// Item name filter: exact match, or /regex/ matched as a substring.
    #[arg(long)]
    pub name: Option<String>,

    /// Required tags (items must carry all of them).
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Skip unknown top-level annotations instead of refusing them.
    #[arg(long)]
    pub loose: bool,

    /// Seconds before a stalled-item notice is printed (diagnostic only).
    #[arg(long)]
    pub stall_warn_secs: Option<u64>,

    /// Do not issue GC hints to workers between items.
    #[arg(long)]
    pub no_gc_between_items: bool,

    /// Project name used in the report and the result tree.
    #[arg(long)]
    pub project_name: Option<String>,
}

/// CLI arguments serialized for the config figment; unset options are
/// skipped so they never shadow file or environment values.
#[derive(Debug, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nworkers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nworker_threads: Option<WorkerThreads>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_init_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_end_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    testitem_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_location: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<LogDisplayMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose_results: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<NameFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stall_warn_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gc_between_items: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<String>,
}

impl RunArgs {
    pub fn into_overrides(self) -> Result<CliOverrides, ConfigError> {
        Ok(CliOverrides {
            paths: (!self.paths.is_empty()).then_some(self.paths),
            nworkers: self.nworkers,
            nworker_threads: self
                .nworker_threads
                .as_deref()
                .map(str::parse)
                .transpose()?,
            worker_init_expr: self.worker_init_expr,
            test_end_expr: self.test_end_expr,
            testitem_timeout: self.testitem_timeout,
            retries: self.retries,
            memory_threshold: self.memory_threshold,
            report: self.report.then_some(true),
            report_location: self.report_location,
            logs: self.logs.as_deref().map(str::parse).transpose()?,
            verbose_results: self.verbose_results.then_some(true),
            name: self.name.map(parse_name_filter),
            tags: (!self.tags.is_empty()).then(|| self.tags.into_iter().collect()),
            strict: self.loose.then_some(false),
            stall_warn_secs: self.stall_warn_secs,
            gc_between_items: self.no_gc_between_items.then_some(false),
            project_name: self.project_name,
        })
    }
}

/// `/.../` selects regex-substring matching, anything else is exact.
fn parse_name_filter(raw: String) -> NameFilter {
    if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
        NameFilter::Pattern(raw[1..raw.len() - 1].to_string())
    } else {
        NameFilter::Exact(raw)
    }
}
