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

use crate::host::{EvalContext, HostError, ModuleHandle, TestHost};
use crate::setup_cache::SetupCache;
use crate::stdio::CaptureGuard;
use std::sync::Arc;
use std::time::Instant;
use testpool_common::model::{
    AssertionOutcome, CodeSource, PerfStats, TestResult, setup_error_message,
};
use testpool_common::protocol::EvalSpec;
use tracing::debug;

/// Evaluates items and expressions against one host environment.
///
/// One instance lives for a worker's whole lifetime, so the setup cache in
/// here is exactly the per-worker memoization: the coordinator's in-process
/// mode builds one evaluator for the whole run and gets the same semantics.
pub struct Evaluator {
    host: Arc<dyn TestHost>,
    setups: SetupCache,
}

impl Evaluator {
    pub fn new(host: Arc<dyn TestHost>) -> Self {
        Self {
            host,
            setups: SetupCache::new(),
        }
    }

    pub fn host(&self) -> &dyn TestHost {
        self.host.as_ref()
    }

    /// One evaluation of one item: missing setups first (each captured to its
    /// own sink), then the body, captured to the item sink in truncate mode so
    /// a retry leaves only its own output behind.
    ///
    /// Setup exceptions become "error during setup" outcomes and the body
    /// still evaluates; the dependency will be re-attempted by the next
    /// dependent item.
    pub fn eval_item(&self, spec: &EvalSpec) -> TestResult {
        let started = Instant::now();
        debug!(item = %spec.name, run = spec.run_number, "evaluating item");

        let mut outcomes = Vec::new();
        let mut modules: Vec<ModuleHandle> = Vec::with_capacity(spec.setups.len());
        for setup in &spec.setups {
            match self.setups.get_or_eval(self.host.as_ref(), setup) {
                Ok(module) => modules.push((*module).clone()),
                Err(err) => outcomes.push(
                    AssertionOutcome::error(setup_error_message(&setup.name, &err.message))
                        .at(&setup.code.file, setup.code.line),
                ),
            }
        }

        let capture = match &spec.log_path {
            Some(path) => match CaptureGuard::redirect_to(path, true) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    outcomes.push(AssertionOutcome::error(format!(
                        "cannot open log sink {}: {err}",
                        path.display()
                    )));
                    None
                }
            },
            None => None,
        };

        let ctx = EvalContext {
            run_number: spec.run_number,
            default_imports: spec.default_imports,
            setups: &modules,
        };
        match self.host.eval_item(&spec.code, &ctx) {
            Ok(body_outcomes) => outcomes.extend(body_outcomes),
            Err(err) => {
                outcomes.push(AssertionOutcome::error(err.message).at(&spec.file, spec.line))
            }
        }
        drop(capture);

        TestResult {
            run_number: spec.run_number,
            outcomes,
            stats: PerfStats::elapsed(started.elapsed()),
        }
    }

    pub fn eval_code(&self, code: &CodeSource) -> Result<serde_json::Value, HostError> {
        self.host.eval_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_host::{ScriptHost, TestContext};
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use testpool_common::model::ItemStatus;
    use testpool_common::protocol::SetupSpec;

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(ScriptHost::new(TestContext {
            project_name: "demo".to_string(),
            total_items: 1,
        })))
    }

    fn spec(body: &str, setups: Vec<SetupSpec>, log_path: Option<PathBuf>) -> EvalSpec {
        EvalSpec {
            item_id: "demo_test.script::one".to_string(),
            name: "one".to_string(),
            file: PathBuf::from("demo_test.script"),
            line: 1,
            code: CodeSource::new(body, "demo_test.script", 1),
            setups,
            tags: BTreeSet::new(),
            default_imports: true,
            run_number: 1,
            log_path,
        }
    }

    #[test]
    fn setup_error_is_recorded_and_the_item_still_runs() {
        let evaluator = evaluator();
        let result = evaluator.eval_item(&spec(
            "pass",
            vec![SetupSpec {
                name: "Broken".to_string(),
                code: CodeSource::new("throw \"db down\"", "broken_testsetup.script", 1),
                log_path: None,
            }],
            None,
        ));
        assert_eq!(result.status(), ItemStatus::Error);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(
            result.outcomes[0].message.as_deref(),
            Some("Error during setup \"Broken\": db down")
        );
        assert_eq!(result.outcomes[1].status, testpool_common::model::AssertionStatus::Pass);
    }

    #[test]
    fn item_capture_truncates_between_runs() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let log = dir.path().join("item.log");
        let evaluator = evaluator();

        let mut first = spec("print run output", vec![], Some(log.clone()));
        first.run_number = 1;
        evaluator.eval_item(&first);

        let mut second = spec("print retry output", vec![], Some(log.clone()));
        second.run_number = 2;
        let result = evaluator.eval_item(&second);

        let captured = std::fs::read_to_string(&log).unwrap();
        assert!(captured.contains("retry output"));
        assert!(!captured.contains("run output"));
        assert_eq!(result.run_number, 2);
    }

    #[test]
    fn thrown_exception_becomes_an_error_outcome_at_the_item() {
        let evaluator = evaluator();
        let result = evaluator.eval_item(&spec("throw \"kaboom\"", vec![], None));
        assert_eq!(result.status(), ItemStatus::Error);
        assert_eq!(result.outcomes[0].message.as_deref(), Some("kaboom"));
        assert_eq!(result.outcomes[0].file.as_deref(), Some(std::path::Path::new("demo_test.script")));
    }

    #[test]
    fn elapsed_time_is_measured() {
        let evaluator = evaluator();
        let result = evaluator.eval_item(&spec("sleep 0.05\npass", vec![], None));
        assert!(result.stats.elapsed_secs >= 0.05);
    }
}
