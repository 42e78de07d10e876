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

//! Progress output for the user terminal. Everything goes through one
//! process-wide print lock so lines from parallel manager tasks never
//! interleave inside a single report block.

use crate::results::ResultTree;
use colored::Colorize;
use std::sync::Mutex;
use testpool_common::config::LogDisplayMode;
use testpool_common::model::{ItemStatus, RunRecord};

pub struct Reporter {
    mode: LogDisplayMode,
    verbose_results: bool,
    print_lock: Mutex<()>,
}

impl Reporter {
    pub fn new(mode: LogDisplayMode, verbose_results: bool) -> Self {
        Self {
            mode,
            verbose_results,
            print_lock: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> LogDisplayMode {
        self.mode
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ()> {
        self.print_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn running(&self, name: &str, worker_pid: Option<u32>, run_number: u32) {
        let _guard = self.locked();
        let retry = if run_number > 1 {
            format!(" (run={run_number})")
        } else {
            String::new()
        };
        match worker_pid {
            Some(pid) => println!("{} {name}{retry} on worker {pid}", "RUNNING".cyan().bold()),
            None => println!("{} {name}{retry} in-process", "RUNNING".cyan().bold()),
        }
    }

    pub fn done(&self, name: &str, record: &RunRecord) {
        let _guard = self.locked();
        let status = match record.status() {
            ItemStatus::Pass => "pass".green(),
            ItemStatus::Fail => "fail".red(),
            ItemStatus::Error => "error".red().bold(),
        };
        println!(
            "{} {name} ({status}, {:.2}s)",
            "DONE".cyan().bold(),
            record.result.stats.elapsed_secs
        );
    }

    pub fn skipped(&self, name: &str) {
        let _guard = self.locked();
        println!("{} {name}", "SKIPPED".yellow().bold());
    }

    /// Diagnostic only; never affects retries.
    pub fn stalled(&self, name: &str, worker_pid: u32, elapsed_secs: f64, log_tail: Option<&str>) {
        let _guard = self.locked();
        println!(
            "{} {name} on worker {worker_pid} has been running for {elapsed_secs:.0}s",
            "STALLED".yellow().bold()
        );
        if let Some(tail) = log_tail {
            for line in tail.lines() {
                println!("    {line}");
            }
        }
    }

    pub fn recycling_worker(&self, worker_pid: u32, memory_percent: f64) {
        let _guard = self.locked();
        println!(
            "{} worker {worker_pid} (memory at {:.0}%)",
            "RECYCLING".yellow().bold(),
            memory_percent * 100.0
        );
    }

    pub fn capture_block(&self, name: &str, run_number: u32, content: &str) {
        let _guard = self.locked();
        println!(
            "{}",
            format!("----- captured logs for \"{name}\" (run={run_number}) -----").dimmed()
        );
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
        println!("{}", format!("----- end of captured logs for \"{name}\" -----").dimmed());
    }

    pub fn interrupted(&self) {
        let _guard = self.locked();
        println!("{} terminating workers, keeping partial results", "INTERRUPTED".red().bold());
    }

    pub fn report_written(&self, path: &std::path::Path) {
        let _guard = self.locked();
        println!("JUnit report written to {}", path.display());
    }

    pub fn report_failed(&self, error: &str) {
        let _guard = self.locked();
        println!("{} report generation failed: {error}", "WARNING".yellow().bold());
    }

    pub fn final_tree(&self, tree: &ResultTree) {
        let _guard = self.locked();
        print!("{}", tree.render(self.verbose_results));
    }
}
