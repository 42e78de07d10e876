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

mod command;

use clap::Parser;
use command::{Cli, Command, RunArgs, WorkerArgs};
use testpool_common::config::RunnerConfig;
use testpool_common::tracing::{TracingConfig, init_tracing};
use testpool_runner::scheduler::Coordinator;
use tracing::error;

/// Exit codes: 0 all passed, 1 some item did not pass, 2 the coordinator or
/// its configuration failed, 130 interrupted.
fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Some(Command::Worker(args)) => run_worker(args),
        None => run(cli.run),
    };
    std::process::exit(code);
}

fn run(args: RunArgs) -> i32 {
    init_tracing(&TracingConfig::runner());

    let overrides = match args.into_overrides() {
        Ok(overrides) => overrides,
        Err(err) => {
            eprintln!("testpool: {err}");
            return 2;
        }
    };
    let config = match RunnerConfig::load(overrides) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("testpool: {err}");
            return 2;
        }
    };
    let program = match std::env::current_exe() {
        Ok(program) => program,
        Err(err) => {
            eprintln!("testpool: cannot resolve own executable: {err}");
            return 2;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("testpool: cannot build runtime: {err}");
            return 2;
        }
    };
    match runtime.block_on(Coordinator::new(config, program).run()) {
        Ok(summary) => summary.exit_code(),
        Err(err) => {
            error!(error = %err, "run failed");
            eprintln!("testpool: {err}");
            2
        }
    }
}

fn run_worker(args: WorkerArgs) -> i32 {
    let threads = match args.threads.parse() {
        Ok(threads) => threads,
        Err(err) => {
            eprintln!("testpool worker: {err}");
            return 2;
        }
    };
    let worker_args = testpool_worker::server::WorkerArgs {
        socket: args.socket,
        project_name: args.project_name,
        threads,
        total_items: args.total_items,
    };
    match testpool_worker::server::main(worker_args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("testpool worker: {err}");
            1
        }
    }
}
