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

use tracing_subscriber::EnvFilter;

/// How a binary of this workspace initializes its tracing subscriber.
///
/// Diagnostics go to stderr; stdout belongs to the reporter. Workers get the
/// same treatment so that anything they log during an evaluation lands in the
/// item's capture file along with the rest of their output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub default_directive: String,
    pub ansi: bool,
    pub with_target: bool,
}

impl TracingConfig {
    pub fn runner() -> Self {
        Self {
            default_directive: "info".to_string(),
            ansi: true,
            with_target: false,
        }
    }

    pub fn worker(worker_name: &str) -> Self {
        Self {
            default_directive: format!("info,{worker_name}=info"),
            ansi: false,
            with_target: true,
        }
    }

    pub fn test() -> Self {
        Self {
            default_directive: "debug".to_string(),
            ansi: false,
            with_target: true,
        }
    }
}

/// Installs the global subscriber; `RUST_LOG` wins over the configured
/// default directive. Safe to call more than once (later calls are no-ops),
/// which the test suites rely on.
pub fn init_tracing(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(config.with_target)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn init_tracing_for_tests() {
    init_tracing(&TracingConfig::test());
}
