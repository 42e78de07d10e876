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

use std::path::PathBuf;
use testpool_common::config::ConfigError;
use testpool_common::model::TestItemId;
use testpool_common::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Handshake failed; the coordinator retries start twice before
    /// propagating this, and then it is fatal to the run.
    #[error("worker failed to start: {0}")]
    StartFailure(String),
    /// The child died (or was killed) with an in-flight request.
    #[error("worker terminated{}", display_signal(.0))]
    Terminated(Option<i32>),
    /// The worker answered with an ERROR frame.
    #[error("worker request failed: {0}")]
    Request(String),
    #[error("worker has an EVAL in flight already")]
    Busy,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn display_signal(signal: &Option<i32>) -> String {
    match signal {
        Some(signal) => format!(" (signal={signal})"),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("duplicate test item id {id}: defined in {first} and {second}")]
    DuplicateId {
        id: TestItemId,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("duplicate test setup \"{name}\": defined in {first} and {second}")]
    DuplicateSetup {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("test item \"{item}\" requires unknown setup \"{setup}\"")]
    UnknownSetup { item: String, setup: String },
    #[error("{file}:{line}: {message}")]
    Parse {
        file: PathBuf,
        line: u32,
        message: String,
    },
    #[error(
        "{file}:{line}: unknown top-level annotation '{annotation}' \
         (strict mode refuses unrecognized calls; pass --loose to skip them)"
    )]
    UnknownAnnotation {
        file: PathBuf,
        line: u32,
        annotation: String,
    },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("path does not exist: {0}")]
    MissingPath(PathBuf),
    #[error("{0} is neither a test file nor a setup file")]
    NotATestFile(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
