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

//! The central scheduler. One manage-worker task per slot runs the
//! dispatch -> evaluate -> record -> retry/advance loop; with zero workers
//! the same policy runs serially in-process (without timeout enforcement,
//! which needs process isolation).

use crate::discovery::{self, Discovered};
use crate::error::RunnerError;
use crate::junit;
use crate::logs::CaptureDir;
use crate::queue::{FilteredQueue, ItemQueue};
use crate::reporter::Reporter;
use crate::results::{Counts, ResultTree};
use crate::worker::{Worker, WorkerLauncher};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use testpool_common::config::{ConfigError, LogDisplayMode, NameFilter, RunnerConfig};
use testpool_common::model::{
    CodeSource, ItemStatus, PerfStats, RunKind, RunRecord, TestItem, TestResult, TestSetup,
    abort_message, timeout_message,
};
use testpool_common::protocol::{EvalSpec, SetupSpec};
use testpool_worker::evaluator::Evaluator;
use testpool_worker::script_host::{ScriptHost, TestContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Advisory: full mark+sweep, then a sweep-only pass.
const GC_HINT: &str = "gc full\ngc sweep";
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct RunSummary {
    pub counts: Counts,
    pub interrupted: bool,
    pub report_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.counts.all_passed() {
            0
        } else {
            1
        }
    }
}

pub struct Coordinator {
    config: RunnerConfig,
    /// Program spawned for each worker slot; the default front end passes
    /// its own executable and handles the `__worker` re-entry.
    worker_program: PathBuf,
}

impl Coordinator {
    pub fn new(config: RunnerConfig, worker_program: PathBuf) -> Self {
        Self {
            config,
            worker_program,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, RunnerError> {
        let interactive = std::io::stdout().is_terminal();
        let mode = self.config.log_mode(interactive);
        let project_root = self.project_root();
        let project_name = self.project_name(&project_root);
        info!(
            project = %project_name,
            nworkers = self.config.nworkers,
            %mode,
            "starting run"
        );

        let discovered = discovery::discover(
            &self.config.paths,
            &project_root,
            ScriptHost::FILE_EXTENSION,
            self.config.strict,
        )?;
        let Discovered { items, setups, files } = discovered;
        debug!(files = files.len(), "discovery complete");

        let mut filtered = FilteredQueue::new(build_filter(&self.config)?);
        let total_discovered = items.len();
        for item in items {
            filtered.push(item);
        }
        let selected = filtered.into_entries();
        info!(
            selected = selected.len(),
            discovered = total_discovered,
            "items selected"
        );

        let reporter = Arc::new(Reporter::new(mode, self.config.verbose_results));
        let mut tree = ResultTree::new(project_name.clone());
        let mut runnable = Vec::new();
        for item in selected {
            let skip = item.flags.skip;
            tree.insert_item(&item, skip);
            if skip {
                reporter.skipped(&item.name);
            } else {
                runnable.push(item);
            }
        }
        let tree = Arc::new(Mutex::new(tree));
        let setups = Arc::new(setups);

        let interrupted = if self.config.nworkers == 0 {
            self.run_in_process(runnable, project_name, setups, &tree, &reporter, mode)
                .await?
        } else {
            self.run_with_workers(runnable, project_name, setups, &tree, &reporter, mode)
                .await?
        };

        let tree = lock(&tree);
        reporter.final_tree(&tree);

        let mut report_path = None;
        if self.config.report {
            let directory = self
                .config
                .report_location
                .clone()
                .unwrap_or_else(|| project_root.clone());
            match junit::write_report(&tree, &directory, Utc::now()) {
                Ok(path) => {
                    reporter.report_written(&path);
                    report_path = Some(path);
                }
                Err(err) => {
                    // Recorded but never unwinds the run.
                    error!(error = %err, "report generation failed");
                    reporter.report_failed(&err.to_string());
                }
            }
        }

        Ok(RunSummary {
            counts: tree.counts(),
            interrupted,
            report_path,
        })
    }

    fn project_root(&self) -> PathBuf {
        match self.config.paths.first() {
            Some(path) if path.is_file() => path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Some(path) => path.clone(),
            None => PathBuf::from("."),
        }
    }

    fn project_name(&self, project_root: &std::path::Path) -> String {
        if let Some(name) = &self.config.project_name {
            return name.clone();
        }
        project_root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "testpool".to_string())
    }

    /// Serial evaluation without subprocesses. Timeouts are deliberately not
    /// enforced here (no isolation to kill) and memory recycling does not
    /// apply; the retry policy is the same one the worker path uses.
    async fn run_in_process(
        &self,
        items: Vec<TestItem>,
        project_name: String,
        setups: Arc<HashMap<String, TestSetup>>,
        tree: &Arc<Mutex<ResultTree>>,
        reporter: &Arc<Reporter>,
        mode: LogDisplayMode,
    ) -> Result<bool, RunnerError> {
        let capture = match mode {
            LogDisplayMode::Eager => None,
            _ => Some(CaptureDir::new()?),
        };
        let evaluator = Arc::new(Evaluator::new(Arc::new(ScriptHost::new(TestContext {
            project_name,
            total_items: items.len(),
        }))));

        let mut interrupted = false;
        'items: for mut item in items {
            let mut run_number: u32 = 1;
            loop {
                item.worker_pid = None;
                item.eval_number = run_number;
                reporter.running(&item.name, None, run_number);
                let spec = build_eval_spec(
                    &item,
                    run_number,
                    &setups,
                    capture.as_ref(),
                    std::process::id(),
                );
                let eval = {
                    let evaluator = evaluator.clone();
                    tokio::task::spawn_blocking(move || evaluator.eval_item(&spec))
                };
                let result = tokio::select! {
                    result = eval => match result {
                        Ok(result) => result,
                        Err(join_error) => TestResult::from_error(
                            run_number,
                            format!("evaluation task failed: {join_error}"),
                            PerfStats::default(),
                        ),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        reporter.interrupted();
                        interrupted = true;
                        break 'items;
                    }
                };
                let record = RunRecord {
                    result,
                    kind: RunKind::Completed,
                    worker_pid: None,
                };
                let status = record.status();
                lock(tree).record(&item.id, record.clone());
                reporter.done(&item.name, &record);
                print_run_logs(reporter, capture.as_ref(), &item, run_number, mode);

                if let Some(expr) = &self.config.test_end_expr {
                    let _ = evaluator.eval_code(&CodeSource::anonymous(expr.as_str()));
                }

                if should_retry(status, &record.kind, run_number, &item, self.config.retries) {
                    run_number += 1;
                    continue;
                }
                print_final_logs(reporter, capture.as_ref(), &item, run_number, status, mode);
                if item.flags.failfast && !status.is_pass() {
                    warn!(item = %item.name, "failfast item did not pass, stopping the run");
                    break 'items;
                }
                continue 'items;
            }
        }
        Ok(interrupted)
    }

    async fn run_with_workers(
        &self,
        items: Vec<TestItem>,
        project_name: String,
        setups: Arc<HashMap<String, TestSetup>>,
        tree: &Arc<Mutex<ResultTree>>,
        reporter: &Arc<Reporter>,
        mode: LogDisplayMode,
    ) -> Result<bool, RunnerError> {
        let capture = Arc::new(CaptureDir::new()?);
        let nworkers = self.config.nworkers;
        let total_items = items.len();
        let queue = Arc::new(ItemQueue::new(items, nworkers));
        let cancel = CancellationToken::new();
        let launcher = Arc::new(WorkerLauncher {
            program: self.worker_program.clone(),
            project_name,
            threads: self.config.nworker_threads,
            total_items,
            init_code: self
                .config
                .worker_init_expr
                .as_ref()
                .map(|expr| CodeSource::anonymous(expr.as_str())),
        });

        let mut managers = tokio::task::JoinSet::new();
        for slot in 0..nworkers {
            managers.spawn(manage_worker(ManagerContext {
                slot,
                config: self.config.clone(),
                queue: queue.clone(),
                setups: setups.clone(),
                tree: tree.clone(),
                reporter: reporter.clone(),
                capture: capture.clone(),
                launcher: launcher.clone(),
                cancel: cancel.clone(),
                mode,
            }));
        }

        let mut interrupted = false;
        let mut fatal: Option<RunnerError> = None;
        loop {
            tokio::select! {
                joined = managers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => {
                        error!(error = %err, "manager task failed, cancelling the run");
                        if fatal.is_none() {
                            fatal = Some(err);
                        }
                        cancel.cancel();
                    }
                    Some(Err(join_error)) => {
                        error!(error = %join_error, "manager task panicked, cancelling the run");
                        if fatal.is_none() {
                            fatal = Some(RunnerError::Io(std::io::Error::other(join_error)));
                        }
                        cancel.cancel();
                    }
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    reporter.interrupted();
                    interrupted = true;
                    cancel.cancel();
                }
            }
        }
        match fatal {
            Some(err) => Err(err),
            None => Ok(interrupted),
        }
    }
}

struct ManagerContext {
    slot: usize,
    config: RunnerConfig,
    queue: Arc<ItemQueue<TestItem>>,
    setups: Arc<HashMap<String, TestSetup>>,
    tree: Arc<Mutex<ResultTree>>,
    reporter: Arc<Reporter>,
    capture: Arc<CaptureDir>,
    launcher: Arc<WorkerLauncher>,
    cancel: CancellationToken,
    mode: LogDisplayMode,
}

enum EvalOutcome {
    Completed(TestResult),
    RequestFailed(String),
    TimedOut,
    Terminated(Option<i32>),
    Cancelled,
}

/// One worker slot: pulls items from the shared queue, keeps exactly one
/// worker alive (replacing it on timeout, crash or memory pressure) and
/// routes every outcome through the retry policy.
async fn manage_worker(ctx: ManagerContext) -> Result<(), RunnerError> {
    let mut worker: Option<Arc<Worker>> = None;
    let mut generation: u64 = 0;
    let result = manage_worker_loop(&ctx, &mut worker, &mut generation).await;
    if let Some(worker) = worker {
        if ctx.cancel.is_cancelled() {
            worker.terminate().await;
        } else {
            worker.close().await;
        }
    }
    result
}

async fn manage_worker_loop(
    ctx: &ManagerContext,
    worker_slot: &mut Option<Arc<Worker>>,
    generation: &mut u64,
) -> Result<(), RunnerError> {
    'items: loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let Some(mut item) = ctx.queue.next(ctx.slot) else {
            return Ok(());
        };
        let mut run_number: u32 = 1;
        loop {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }

            // Memory policy runs before each dispatch, independent of the
            // item's retry state.
            if let Some(active) = worker_slot.as_ref() {
                let memory = Worker::memory_percent();
                if memory > ctx.config.memory_threshold {
                    ctx.reporter.recycling_worker(active.pid(), memory);
                    active.terminate().await;
                    *worker_slot = None;
                }
            }
            let worker = match worker_slot.as_ref() {
                Some(worker) => worker.clone(),
                None => {
                    *generation += 1;
                    let capture = ctx.capture.clone();
                    let slot = ctx.slot;
                    let generation = *generation;
                    let started = Worker::start_with_retries(&ctx.launcher, move |attempt| {
                        capture.socket_path(slot, generation * 10 + attempt as u64)
                    })
                    .await?;
                    *worker_slot = Some(started.clone());
                    started
                }
            };

            item.worker_pid = Some(worker.pid());
            item.eval_number = run_number;
            ctx.reporter.running(&item.name, Some(worker.pid()), run_number);

            let spec = build_eval_spec(&item, run_number, &ctx.setups, capture_for(ctx), worker.pid());
            let timeout = item
                .timeout
                .unwrap_or_else(|| Duration::from_secs_f64(ctx.config.testitem_timeout));

            let record = match await_eval(ctx, &worker, &item, spec, timeout).await {
                EvalOutcome::Completed(result) => RunRecord {
                    result,
                    kind: RunKind::Completed,
                    worker_pid: Some(worker.pid()),
                },
                EvalOutcome::RequestFailed(message) => RunRecord {
                    result: TestResult::from_error(run_number, message, PerfStats::default()),
                    kind: RunKind::Completed,
                    worker_pid: Some(worker.pid()),
                },
                EvalOutcome::TimedOut => {
                    // Kill first so a runaway evaluation cannot keep writing
                    // into the capture while we record.
                    worker.terminate().await;
                    *worker_slot = None;
                    let seconds = timeout.as_secs_f64();
                    RunRecord {
                        result: TestResult {
                            run_number,
                            outcomes: vec![testpool_common::model::AssertionOutcome::error(
                                timeout_message(&item.name, seconds, run_number),
                            )],
                            stats: PerfStats {
                                elapsed_secs: seconds,
                                ..PerfStats::default()
                            },
                        },
                        kind: RunKind::Timeout { seconds },
                        worker_pid: Some(worker.pid()),
                    }
                }
                EvalOutcome::Terminated(signal) => {
                    worker.terminate().await;
                    *worker_slot = None;
                    RunRecord {
                        result: TestResult::from_error(
                            run_number,
                            abort_message(&item.name, signal, run_number),
                            PerfStats::default(),
                        ),
                        kind: RunKind::WorkerAborted { signal },
                        worker_pid: Some(worker.pid()),
                    }
                }
                EvalOutcome::Cancelled => {
                    worker.terminate().await;
                    *worker_slot = None;
                    return Ok(());
                }
            };

            let status = record.status();
            let kind = record.kind.clone();
            lock(&ctx.tree).record(&item.id, record.clone());
            ctx.reporter.done(&item.name, &record);
            print_run_logs(&ctx.reporter, capture_for(ctx), &item, run_number, ctx.mode);

            if matches!(kind, RunKind::Completed) && worker.is_running() {
                if let Some(expr) = &ctx.config.test_end_expr {
                    let hook = worker.eval_code(CodeSource::anonymous(expr.as_str()));
                    if let Ok(Err(err)) = tokio::time::timeout(HOOK_TIMEOUT, hook).await {
                        debug!(error = %err, "test_end expression failed");
                    }
                }
                if ctx.config.gc_between_items {
                    let hint = worker.eval_code(CodeSource::anonymous(GC_HINT));
                    let _ = tokio::time::timeout(HOOK_TIMEOUT, hint).await;
                }
            }

            if should_retry(status, &kind, run_number, &item, ctx.config.retries) {
                run_number += 1;
                continue;
            }
            print_final_logs(&ctx.reporter, capture_for(ctx), &item, run_number, status, ctx.mode);
            if item.flags.failfast && !status.is_pass() {
                warn!(item = %item.name, "failfast item did not pass, cancelling the run");
                ctx.cancel.cancel();
            }
            continue 'items;
        }
    }
}

fn capture_for(ctx: &ManagerContext) -> Option<&CaptureDir> {
    match ctx.mode {
        LogDisplayMode::Eager => None,
        _ => Some(&*ctx.capture),
    }
}

/// Awaits the response future, the timeout and the stall ticker together.
/// The stall notice is diagnostic only; it fires repeatedly below the
/// timeout and additionally asks the worker for a profile capture.
async fn await_eval(
    ctx: &ManagerContext,
    worker: &Arc<Worker>,
    item: &TestItem,
    spec: EvalSpec,
    timeout: Duration,
) -> EvalOutcome {
    use crate::error::WorkerError;

    let started = Instant::now();
    let eval = worker.eval_item(spec);
    tokio::pin!(eval);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let stall = Duration::from_secs(ctx.config.stall_warn_secs.max(1));
    let mut stall_ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + stall, stall);

    loop {
        tokio::select! {
            result = &mut eval => {
                return match result {
                    Ok(result) => EvalOutcome::Completed(result),
                    Err(WorkerError::Terminated(signal)) => EvalOutcome::Terminated(signal),
                    Err(err) => EvalOutcome::RequestFailed(err.to_string()),
                };
            }
            _ = &mut deadline => return EvalOutcome::TimedOut,
            _ = ctx.cancel.cancelled() => return EvalOutcome::Cancelled,
            _ = stall_ticker.tick() => {
                let tail = CaptureDir::read_log_tail(&ctx.capture.item_log_path(&item.id), 20);
                ctx.reporter.stalled(
                    &item.name,
                    worker.pid(),
                    started.elapsed().as_secs_f64(),
                    tail.as_deref(),
                );
                worker.profile(ctx.config.stall_warn_secs, item.name.clone());
            }
        }
    }
}

fn build_eval_spec(
    item: &TestItem,
    run_number: u32,
    setups: &HashMap<String, TestSetup>,
    capture: Option<&CaptureDir>,
    worker_pid: u32,
) -> EvalSpec {
    let setup_specs = item
        .setups
        .iter()
        .filter_map(|name| setups.get(name))
        .map(|setup| SetupSpec {
            name: setup.name.clone(),
            code: setup.code.clone(),
            log_path: capture.map(|c| c.setup_log_path(&setup.name, worker_pid)),
        })
        .collect();
    EvalSpec {
        item_id: item.id.0.clone(),
        name: item.name.clone(),
        file: item.file.clone(),
        line: item.line,
        code: item.code.clone(),
        setups: setup_specs,
        tags: item.tags.clone(),
        default_imports: item.flags.default_imports,
        run_number,
        log_path: capture.map(|c| c.item_log_path(&item.id)),
    }
}

/// Retry iff the outcome was not a pass (timeouts and crashes included) and
/// the budget `1 + max(global, item)` still has room at this run number.
pub fn should_retry(
    status: ItemStatus,
    kind: &RunKind,
    run_number: u32,
    item: &TestItem,
    global_retries: u32,
) -> bool {
    let retryable = !status.is_pass() || !matches!(kind, RunKind::Completed);
    retryable && run_number < 1 + global_retries.max(item.retries)
}

fn print_run_logs(
    reporter: &Reporter,
    capture: Option<&CaptureDir>,
    item: &TestItem,
    run_number: u32,
    mode: LogDisplayMode,
) {
    if mode != LogDisplayMode::Batched {
        return;
    }
    if let Some(capture) = capture
        && let Some(content) = CaptureDir::read_log(&capture.item_log_path(&item.id))
    {
        reporter.capture_block(&item.name, run_number, &content);
    }
}

/// The issues-mode contract: captured logs reach the terminal iff the final
/// result for the item is not a pass.
fn print_final_logs(
    reporter: &Reporter,
    capture: Option<&CaptureDir>,
    item: &TestItem,
    run_number: u32,
    status: ItemStatus,
    mode: LogDisplayMode,
) {
    if mode != LogDisplayMode::Issues || status.is_pass() {
        return;
    }
    if let Some(capture) = capture
        && let Some(content) = CaptureDir::read_log(&capture.item_log_path(&item.id))
    {
        reporter.capture_block(&item.name, run_number, &content);
    }
}

fn build_filter(
    config: &RunnerConfig,
) -> Result<impl Fn(&TestItem) -> bool + Send + Sync + 'static, RunnerError> {
    enum CompiledName {
        Any,
        Exact(String),
        Pattern(Regex),
    }
    let name = match &config.name {
        None => CompiledName::Any,
        Some(NameFilter::Exact(name)) => CompiledName::Exact(name.clone()),
        Some(NameFilter::Pattern(pattern)) => CompiledName::Pattern(
            Regex::new(pattern).map_err(|err| {
                RunnerError::Config(ConfigError::Invalid(format!(
                    "invalid name pattern '{pattern}': {err}"
                )))
            })?,
        ),
    };
    let tags = config.tags.clone();
    Ok(move |item: &TestItem| {
        let name_matches = match &name {
            CompiledName::Any => true,
            CompiledName::Exact(exact) => item.name == *exact,
            CompiledName::Pattern(pattern) => pattern.is_match(&item.name),
        };
        name_matches && tags.iter().all(|tag| item.tags.contains(tag))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpool_common::model::{ItemFlags, TestItemId};

    fn item(retries: u32, tags: &[&str], name: &str) -> TestItem {
        TestItem {
            id: TestItemId::derived("a_test.script", name),
            name: name.to_string(),
            file: "a_test.script".into(),
            line: 1,
            project_root: ".".into(),
            code: CodeSource::new("pass", "a_test.script", 1),
            setups: vec![],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            flags: ItemFlags::default(),
            retries,
            timeout: None,
            worker_pid: None,
            eval_number: 0,
        }
    }

    #[test]
    fn retry_budget_is_one_plus_max_of_global_and_item() {
        let the_item = item(4, &[], "flaky");
        // global=2, item=4: runs 1..=4 retry, run 5 is final.
        for run in 1..=4 {
            assert!(should_retry(ItemStatus::Fail, &RunKind::Completed, run, &the_item, 2));
        }
        assert!(!should_retry(ItemStatus::Fail, &RunKind::Completed, 5, &the_item, 2));

        let plain = item(0, &[], "plain");
        assert!(!should_retry(ItemStatus::Fail, &RunKind::Completed, 1, &plain, 0));
        assert!(should_retry(ItemStatus::Fail, &RunKind::Completed, 1, &plain, 2));
    }

    #[test]
    fn passes_do_not_retry_but_crashes_do() {
        let the_item = item(0, &[], "x");
        assert!(!should_retry(ItemStatus::Pass, &RunKind::Completed, 1, &the_item, 3));
        assert!(should_retry(
            ItemStatus::Error,
            &RunKind::WorkerAborted { signal: Some(6) },
            1,
            &the_item,
            3
        ));
        assert!(should_retry(
            ItemStatus::Error,
            &RunKind::Timeout { seconds: 4.0 },
            1,
            &the_item,
            3
        ));
    }

    #[test]
    fn name_filter_exact_and_pattern() {
        let exact = RunnerConfig {
            name: Some(NameFilter::Exact("first".to_string())),
            ..RunnerConfig::default()
        };
        let filter = build_filter(&exact).unwrap();
        assert!(filter(&item(0, &[], "first")));
        assert!(!filter(&item(0, &[], "first-and-more")));

        let pattern = RunnerConfig {
            name: Some(NameFilter::Pattern("^fir".to_string())),
            ..RunnerConfig::default()
        };
        let filter = build_filter(&pattern).unwrap();
        assert!(filter(&item(0, &[], "first-and-more")));
        assert!(!filter(&item(0, &[], "second")));
    }

    #[test]
    fn tag_filter_requires_a_superset() {
        let config = RunnerConfig {
            tags: ["db", "fast"].iter().map(|t| t.to_string()).collect(),
            ..RunnerConfig::default()
        };
        let filter = build_filter(&config).unwrap();
        assert!(filter(&item(0, &["db", "fast", "extra"], "a")));
        assert!(!filter(&item(0, &["db"], "b")));
    }

    #[test]
    fn invalid_name_pattern_is_a_config_error() {
        let config = RunnerConfig {
            name: Some(NameFilter::Pattern("(unclosed".to_string())),
            ..RunnerConfig::default()
        };
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn exit_codes_follow_the_contract() {
        let green = RunSummary {
            counts: Counts {
                passed: 2,
                ..Counts::default()
            },
            interrupted: false,
            report_path: None,
        };
        assert_eq!(green.exit_code(), 0);

        let red = RunSummary {
            counts: Counts {
                passed: 1,
                failed: 1,
                ..Counts::default()
            },
            interrupted: false,
            report_path: None,
        };
        assert_eq!(red.exit_code(), 1);

        let stopped = RunSummary {
            counts: Counts::default(),
            interrupted: true,
            report_path: None,
        };
        assert_eq!(stopped.exit_code(), 130);
    }
}
