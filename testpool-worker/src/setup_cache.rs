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

use crate::host::{HostError, ModuleHandle, TestHost};
use crate::stdio::CaptureGuard;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use testpool_common::protocol::SetupSpec;
use tracing::debug;

/// Per-worker memoization of evaluated setups.
///
/// A setup's code runs at most once per worker: the first dependent item
/// evaluates it, every later one reuses the module handle. A failed
/// evaluation is not cached, so the next dependent item re-attempts it and
/// its sink only ever holds the output of the last attempt. The lock spans
/// the evaluation, keeping setup evaluation serial on this worker.
pub struct SetupCache {
    entries: Mutex<HashMap<String, Arc<ModuleHandle>>>,
}

impl SetupCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_eval(
        &self,
        host: &dyn TestHost,
        spec: &SetupSpec,
    ) -> Result<Arc<ModuleHandle>, HostError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(module) = entries.get(&spec.name) {
            debug!(setup = %spec.name, "setup cache hit");
            return Ok(module.clone());
        }
        debug!(setup = %spec.name, "evaluating setup");
        let module = {
            let _capture = match &spec.log_path {
                Some(path) => Some(
                    CaptureGuard::redirect_to(path, true)
                        .map_err(|err| HostError::new(format!("cannot open setup sink: {err}")))?,
                ),
                None => None,
            };
            host.eval_setup(&spec.name, &spec.code)?
        };
        let module = Arc::new(module);
        entries.insert(spec.name.clone(), module.clone());
        Ok(module)
    }

    #[cfg(test)]
    pub fn cached(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }
}

impl Default for SetupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_host::{ScriptHost, TestContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testpool_common::model::{AssertionOutcome, CodeSource};

    struct CountingHost {
        inner: ScriptHost,
        setup_evals: AtomicUsize,
    }

    impl TestHost for CountingHost {
        fn file_extension(&self) -> &'static str {
            self.inner.file_extension()
        }

        fn eval_setup(&self, name: &str, code: &CodeSource) -> Result<ModuleHandle, HostError> {
            self.setup_evals.fetch_add(1, Ordering::SeqCst);
            self.inner.eval_setup(name, code)
        }

        fn eval_item(
            &self,
            code: &CodeSource,
            ctx: &crate::host::EvalContext<'_>,
        ) -> Result<Vec<AssertionOutcome>, HostError> {
            self.inner.eval_item(code, ctx)
        }

        fn eval_code(&self, code: &CodeSource) -> Result<serde_json::Value, HostError> {
            self.inner.eval_code(code)
        }
    }

    fn counting_host() -> CountingHost {
        CountingHost {
            inner: ScriptHost::new(TestContext::default()),
            setup_evals: AtomicUsize::new(0),
        }
    }

    fn spec(name: &str, body: &str) -> SetupSpec {
        SetupSpec {
            name: name.to_string(),
            code: CodeSource::new(body, "fixtures_testsetup.script", 1),
            log_path: None,
        }
    }

    #[test]
    fn second_lookup_reuses_the_module() {
        let host = counting_host();
        let cache = SetupCache::new();
        let spec = spec("Fixtures", "let answer 42");

        let first = cache.get_or_eval(&host, &spec).expect("eval failed");
        let second = cache.get_or_eval(&host, &spec).expect("eval failed");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(host.setup_evals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_setup_is_reattempted() {
        let host = counting_host();
        let cache = SetupCache::new();
        let spec = spec("Broken", "throw \"db down\"");

        assert!(cache.get_or_eval(&host, &spec).is_err());
        assert!(!cache.cached("Broken"));
        assert!(cache.get_or_eval(&host, &spec).is_err());
        assert_eq!(host.setup_evals.load(Ordering::SeqCst), 2);
    }
}
