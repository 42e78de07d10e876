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

//! JUnit XML output: one `<testsuites>` with a `<testsuite>` per file and a
//! `<testcase>` per item-run, so retried items show every attempt.
//! Performance statistics go out as `<property>` children with time values
//! in seconds.

use crate::results::{ItemNode, ResultTree};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use testpool_common::model::{AssertionStatus, ItemStatus, RunKind, RunRecord};

pub fn report_file_name(timestamp: DateTime<Utc>) -> String {
    format!("testpool-report-{}.xml", timestamp.format("%Y%m%d-%H%M%S"))
}

/// Renders and writes the report into `directory`, returning the path.
pub fn write_report(
    tree: &ResultTree,
    directory: &Path,
    timestamp: DateTime<Utc>,
) -> std::io::Result<PathBuf> {
    let path = directory.join(report_file_name(timestamp));
    std::fs::create_dir_all(directory)?;
    std::fs::write(&path, render(tree, timestamp))?;
    Ok(path)
}

#[derive(Default)]
struct CaseCounts {
    tests: usize,
    skipped: usize,
    failures: usize,
    errors: usize,
    time_secs: f64,
}

impl CaseCounts {
    fn add(&mut self, other: &CaseCounts) {
        self.tests += other.tests;
        self.skipped += other.skipped;
        self.failures += other.failures;
        self.errors += other.errors;
        self.time_secs += other.time_secs;
    }

    fn count_item(&mut self, item: &ItemNode) {
        if item.skipped {
            self.tests += 1;
            self.skipped += 1;
            return;
        }
        for run in &item.runs {
            self.tests += 1;
            self.time_secs += run.result.stats.elapsed_secs;
            match run.status() {
                ItemStatus::Pass => {}
                ItemStatus::Fail => self.failures += 1,
                ItemStatus::Error => self.errors += 1,
            }
        }
    }
}

pub fn render(tree: &ResultTree, timestamp: DateTime<Utc>) -> String {
    let timestamp_attr = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut totals = CaseCounts::default();
    let mut suites = String::new();
    for (file, items) in tree.files() {
        let mut counts = CaseCounts::default();
        for item in &items {
            counts.count_item(item);
        }

        let _ = writeln!(
            suites,
            "  <testsuite name=\"{}\" timestamp=\"{}\" time=\"{:.3}\" tests=\"{}\" skipped=\"{}\" failures=\"{}\" errors=\"{}\">",
            escape(&file.to_string_lossy()),
            timestamp_attr,
            counts.time_secs,
            counts.tests,
            counts.skipped,
            counts.failures,
            counts.errors,
        );
        for item in &items {
            render_item(&mut suites, item);
        }
        let _ = writeln!(suites, "  </testsuite>");
        totals.add(&counts);
    }

    let mut out = String::new();
    let _ = writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = writeln!(
        out,
        "<testsuites name=\"{}\" timestamp=\"{}\" time=\"{:.3}\" tests=\"{}\" skipped=\"{}\" failures=\"{}\" errors=\"{}\">",
        escape(tree.project_name()),
        timestamp_attr,
        totals.time_secs,
        totals.tests,
        totals.skipped,
        totals.failures,
        totals.errors,
    );
    out.push_str(&suites);
    let _ = writeln!(out, "</testsuites>");
    out
}

fn render_item(out: &mut String, item: &ItemNode) {
    if item.skipped {
        let _ = writeln!(
            out,
            "    <testcase name=\"{}\" time=\"0.000\">\n      <skipped/>\n    </testcase>",
            escape(&item.name)
        );
        return;
    }
    for run in &item.runs {
        let _ = writeln!(
            out,
            "    <testcase name=\"{}\" run=\"{}\" time=\"{:.3}\">",
            escape(&item.name),
            run.result.run_number,
            run.result.stats.elapsed_secs,
        );
        render_properties(out, run);
        if let Some((element, message)) = non_pass_element(run) {
            let _ = writeln!(
                out,
                "      <{element} message=\"{}\">{}</{element}>",
                escape(&message),
                escape(&outcome_details(run)),
            );
        }
        let _ = writeln!(out, "    </testcase>");
    }
}

fn render_properties(out: &mut String, run: &RunRecord) {
    let stats = &run.result.stats;
    let properties: [(&str, String); 6] = [
        ("elapsed_seconds", format!("{:.6}", stats.elapsed_secs)),
        ("allocated_bytes", stats.allocated_bytes.to_string()),
        ("allocation_count", stats.allocation_count.to_string()),
        ("gc_seconds", format!("{:.6}", stats.gc_secs)),
        ("compile_seconds", format!("{:.6}", stats.compile_secs)),
        ("recompile_seconds", format!("{:.6}", stats.recompile_secs)),
    ];
    let _ = writeln!(out, "      <properties>");
    for (name, value) in properties {
        let _ = writeln!(out, "        <property name=\"{name}\" value=\"{}\"/>", escape(&value));
    }
    let _ = writeln!(out, "      </properties>");
}

/// Message contract: "Test failed" for failures; errors carry the
/// synthesized timeout/abort text when that is what happened, otherwise
/// "Error during test" or "Multiple errors".
fn non_pass_element(run: &RunRecord) -> Option<(&'static str, String)> {
    match run.status() {
        ItemStatus::Pass => None,
        ItemStatus::Fail => Some(("failure", "Test failed".to_string())),
        ItemStatus::Error => {
            let message = match &run.kind {
                RunKind::Timeout { .. } | RunKind::WorkerAborted { .. } => run
                    .result
                    .outcomes
                    .iter()
                    .find(|outcome| outcome.status == AssertionStatus::Error)
                    .and_then(|outcome| outcome.message.clone())
                    .unwrap_or_else(|| "Error during test".to_string()),
                RunKind::Completed => {
                    if run.result.count(AssertionStatus::Error) > 1 {
                        "Multiple errors".to_string()
                    } else {
                        "Error during test".to_string()
                    }
                }
            };
            Some(("error", message))
        }
    }
}

fn outcome_details(run: &RunRecord) -> String {
    let mut details = String::new();
    for outcome in &run.result.outcomes {
        if outcome.status == AssertionStatus::Pass {
            continue;
        }
        let location = match (&outcome.file, outcome.line) {
            (Some(file), Some(line)) => format!("{}:{line}: ", file.display()),
            _ => String::new(),
        };
        let status = match outcome.status {
            AssertionStatus::Pass => "pass",
            AssertionStatus::Fail => "fail",
            AssertionStatus::Error => "error",
        };
        let _ = writeln!(
            details,
            "{location}{status}: {}",
            outcome.message.as_deref().unwrap_or("")
        );
    }
    details
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use testpool_common::model::{
        AssertionOutcome, CodeSource, ItemFlags, PerfStats, TestItem, TestItemId, TestResult,
        timeout_message,
    };

    fn item(file: &str, name: &str) -> TestItem {
        TestItem {
            id: TestItemId::derived(file, name),
            name: name.to_string(),
            file: file.into(),
            line: 1,
            project_root: ".".into(),
            code: CodeSource::new("pass", file, 1),
            setups: vec![],
            tags: BTreeSet::new(),
            flags: ItemFlags::default(),
            retries: 0,
            timeout: None,
            worker_pid: None,
            eval_number: 0,
        }
    }

    fn record(run_number: u32, outcomes: Vec<AssertionOutcome>, kind: RunKind) -> RunRecord {
        RunRecord {
            result: TestResult {
                run_number,
                outcomes,
                stats: PerfStats {
                    elapsed_secs: 0.5,
                    ..PerfStats::default()
                },
            },
            kind,
            worker_pid: Some(7),
        }
    }

    #[test]
    fn every_run_of_a_retried_item_is_a_testcase() {
        let mut tree = ResultTree::new("demo");
        let flaky = item("a_test.script", "flaky");
        tree.insert_item(&flaky, false);
        tree.record(
            &flaky.id,
            record(1, vec![AssertionOutcome::fail("nope")], RunKind::Completed),
        );
        tree.record(&flaky.id, record(2, vec![AssertionOutcome::pass()], RunKind::Completed));

        let xml = render(&tree, Utc::now());
        assert_eq!(xml.matches("<testcase name=\"flaky\"").count(), 2);
        assert!(xml.contains("<failure message=\"Test failed\">"));
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
    }

    #[test]
    fn timeout_runs_carry_the_synthesized_message() {
        let mut tree = ResultTree::new("demo");
        let slow = item("a_test.script", "slow");
        tree.insert_item(&slow, false);
        let message = timeout_message("slow", 4.0, 1);
        tree.record(
            &slow.id,
            record(
                1,
                vec![AssertionOutcome::error(message.clone())],
                RunKind::Timeout { seconds: 4.0 },
            ),
        );

        let xml = render(&tree, Utc::now());
        assert!(xml.contains(&format!("<error message=\"{}\">", escape(&message))));
    }

    #[test]
    fn multiple_errors_get_the_aggregate_message() {
        let mut tree = ResultTree::new("demo");
        let bad = item("a_test.script", "bad");
        tree.insert_item(&bad, false);
        tree.record(
            &bad.id,
            record(
                1,
                vec![
                    AssertionOutcome::error("one"),
                    AssertionOutcome::error("two"),
                ],
                RunKind::Completed,
            ),
        );

        let xml = render(&tree, Utc::now());
        assert!(xml.contains("<error message=\"Multiple errors\">"));
    }

    #[test]
    fn skipped_items_emit_a_skipped_child() {
        let mut tree = ResultTree::new("demo");
        tree.insert_item(&item("a_test.script", "off"), true);
        let xml = render(&tree, Utc::now());
        assert!(xml.contains("<skipped/>"));
        assert!(xml.contains("skipped=\"1\""));
    }

    #[test]
    fn perf_stats_are_properties_in_seconds() {
        let mut tree = ResultTree::new("demo");
        let ok = item("a_test.script", "ok");
        tree.insert_item(&ok, false);
        tree.record(&ok.id, record(1, vec![AssertionOutcome::pass()], RunKind::Completed));
        let xml = render(&tree, Utc::now());
        assert!(xml.contains("<property name=\"elapsed_seconds\" value=\"0.500000\"/>"));
        assert!(xml.contains("<property name=\"gc_seconds\" value=\"0.000000\"/>"));
    }

    #[test]
    fn names_are_escaped() {
        let mut tree = ResultTree::new("demo <&>");
        tree.insert_item(&item("a_test.script", "quote \" name"), false);
        let xml = render(&tree, Utc::now());
        assert!(xml.contains("name=\"demo &lt;&amp;&gt;\""));
        assert!(xml.contains("quote &quot; name"));
    }
}
