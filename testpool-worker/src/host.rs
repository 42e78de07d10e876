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

//! The seam between supervision and evaluation. Everything above this trait
//! treats code values as opaque blobs; everything below is host-specific.

use std::collections::HashMap;
use testpool_common::model::{AssertionOutcome, CodeSource};

/// Handle to a setup module evaluated on this worker. At most one exists per
/// (worker, setup-name) pair at any time; the setup cache enforces that.
#[derive(Debug, Clone, Default)]
pub struct ModuleHandle {
    pub name: String,
    pub bindings: HashMap<String, serde_json::Value>,
}

/// An exception escaping host evaluation.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Ambient state of one item evaluation.
pub struct EvalContext<'a> {
    /// 1-based attempt counter of this evaluation.
    pub run_number: u32,
    pub default_imports: bool,
    /// Successfully evaluated setup modules, in the item's declared order.
    pub setups: &'a [ModuleHandle],
}

/// The host test environment living inside a worker process.
///
/// Calls may block arbitrarily; the worker runs them on its blocking pool and
/// keeps its transport reader responsive in the meantime. Evaluation of items
/// and setups on one worker is sequential by construction.
pub trait TestHost: Send + Sync + 'static {
    /// Extension of the source files this host evaluates, without the dot.
    fn file_extension(&self) -> &'static str;

    /// Evaluates a setup block in a fresh module context.
    fn eval_setup(&self, name: &str, code: &CodeSource) -> Result<ModuleHandle, HostError>;

    /// Evaluates one item body in a fresh module environment and returns the
    /// assertion outcomes the body recorded. `Err` means an exception escaped
    /// the body (distinct from a recorded error outcome).
    fn eval_item(
        &self,
        code: &CodeSource,
        ctx: &EvalContext<'_>,
    ) -> Result<Vec<AssertionOutcome>, HostError>;

    /// Evaluates an opaque expression: the startup handshake, GC hints and
    /// test-end hooks all arrive through here.
    fn eval_code(&self, code: &CodeSource) -> Result<serde_json::Value, HostError>;
}
