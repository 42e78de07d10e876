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

//! The directory-shaped result tree. Leaves are items carrying every
//! recorded run; non-leaf levels are files and directories. Built
//! incrementally as results arrive, rendered once at the end with children
//! sorted by path and counters aggregated bottom-up.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Component, PathBuf};
use testpool_common::model::{ItemStatus, RunRecord, TestItem, TestItemId};

#[derive(Debug)]
pub struct ItemNode {
    pub id: TestItemId,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub skipped: bool,
    /// Run number `k` is always recorded before `k+1`.
    pub runs: Vec<RunRecord>,
}

impl ItemNode {
    /// `None` until the first run is recorded (or forever, for skipped items
    /// and items cancelled before dispatch).
    pub fn final_status(&self) -> Option<ItemStatus> {
        self.runs.last().map(|run| run.status())
    }

    pub fn passed(&self) -> bool {
        self.final_status().is_some_and(|status| status.is_pass())
    }

    pub fn duration_secs(&self) -> f64 {
        self.runs.iter().map(|run| run.result.stats.elapsed_secs).sum()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub duration_secs: f64,
}

impl Counts {
    fn add_item(&mut self, item: &ItemNode) {
        self.duration_secs += item.duration_secs();
        if item.skipped {
            self.skipped += 1;
            return;
        }
        match item.final_status() {
            Some(ItemStatus::Pass) => self.passed += 1,
            Some(ItemStatus::Fail) => self.failed += 1,
            Some(ItemStatus::Error) => self.errored += 1,
            None => self.not_run += 1,
        }
    }

    fn merge(&mut self, other: Counts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.not_run += other.not_run;
        self.duration_secs += other.duration_secs;
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped + self.not_run
    }

    /// The run is green when everything that was supposed to run ran and
    /// passed; skips are fine, unevaluated items are not.
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.not_run == 0
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.passed > 0 {
            parts.push(format!("{} passed", self.passed));
        }
        if self.failed > 0 {
            parts.push(format!("{} failed", self.failed));
        }
        if self.errored > 0 {
            parts.push(format!("{} errored", self.errored));
        }
        if self.skipped > 0 {
            parts.push(format!("{} skipped", self.skipped));
        }
        if self.not_run > 0 {
            parts.push(format!("{} not run", self.not_run));
        }
        if parts.is_empty() {
            parts.push("no items".to_string());
        }
        parts.join(", ")
    }
}

#[derive(Debug)]
pub struct ResultTree {
    project_name: String,
    items: HashMap<TestItemId, ItemNode>,
    /// File path -> item ids in source order; BTreeMap keeps files sorted.
    files: BTreeMap<PathBuf, Vec<TestItemId>>,
}

impl ResultTree {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            items: HashMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn insert_item(&mut self, item: &TestItem, skipped: bool) {
        self.files
            .entry(item.file.clone())
            .or_default()
            .push(item.id.clone());
        self.items.insert(
            item.id.clone(),
            ItemNode {
                id: item.id.clone(),
                name: item.name.clone(),
                file: item.file.clone(),
                line: item.line,
                skipped,
                runs: Vec::new(),
            },
        );
    }

    pub fn record(&mut self, id: &TestItemId, record: RunRecord) {
        if let Some(node) = self.items.get_mut(id) {
            debug_assert_eq!(record.result.run_number as usize, node.runs.len() + 1);
            node.runs.push(record);
        }
    }

    pub fn item(&self, id: &TestItemId) -> Option<&ItemNode> {
        self.items.get(id)
    }

    /// Files sorted by path, each with its items in source order.
    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, Vec<&ItemNode>)> {
        self.files.iter().map(|(path, ids)| {
            let nodes = ids.iter().filter_map(|id| self.items.get(id)).collect();
            (path, nodes)
        })
    }

    pub fn non_passing_items(&self) -> Vec<&ItemNode> {
        self.files()
            .flat_map(|(_, nodes)| nodes)
            .filter(|node| !node.skipped && !node.passed())
            .collect()
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for node in self.items.values() {
            counts.add_item(node);
        }
        counts
    }

    /// The final printed tree.
    pub fn render(&self, verbose: bool) -> String {
        let mut root = RenderDir::default();
        for (path, nodes) in self.files() {
            let mut dir = &mut root;
            let components: Vec<_> = path.components().collect();
            for component in components.iter().take(components.len().saturating_sub(1)) {
                if let Component::Normal(name) = component {
                    dir = dir
                        .dirs
                        .entry(name.to_string_lossy().into_owned())
                        .or_default();
                }
            }
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            dir.files.insert(file_name, nodes);
        }

        let mut out = String::new();
        let counts = self.counts();
        let _ = writeln!(
            out,
            "{}: {} items ({}) in {:.2}s",
            self.project_name,
            counts.total(),
            counts.summary(),
            counts.duration_secs
        );
        root.render(&mut out, 1, verbose);
        out
    }
}

#[derive(Default)]
struct RenderDir<'a> {
    dirs: BTreeMap<String, RenderDir<'a>>,
    files: BTreeMap<String, Vec<&'a ItemNode>>,
}

impl RenderDir<'_> {
    fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for dir in self.dirs.values() {
            counts.merge(dir.counts());
        }
        for nodes in self.files.values() {
            for node in nodes {
                counts.add_item(node);
            }
        }
        counts
    }

    fn render(&self, out: &mut String, depth: usize, verbose: bool) {
        let indent = "  ".repeat(depth);
        for (name, dir) in &self.dirs {
            let counts = dir.counts();
            let _ = writeln!(
                out,
                "{indent}{name}/: {} ({:.2}s)",
                counts.summary(),
                counts.duration_secs
            );
            dir.render(out, depth + 1, verbose);
        }
        for (name, nodes) in &self.files {
            let mut counts = Counts::default();
            for node in nodes {
                counts.add_item(node);
            }
            let _ = writeln!(
                out,
                "{indent}{name}: {} ({:.2}s)",
                counts.summary(),
                counts.duration_secs
            );
            if verbose {
                for node in nodes {
                    let status = if node.skipped {
                        "skipped"
                    } else {
                        match node.final_status() {
                            Some(ItemStatus::Pass) => "passed",
                            Some(ItemStatus::Fail) => "failed",
                            Some(ItemStatus::Error) => "errored",
                            None => "not run",
                        }
                    };
                    let _ = writeln!(
                        out,
                        "{indent}  {}: {status} ({} runs, {:.2}s)",
                        node.name,
                        node.runs.len(),
                        node.duration_secs()
                    );
                }
            }
        }
    }
}
