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

//! The worker subprocess: connects back to the coordinator's socket and
//! answers requests until EOF. Items and expressions evaluate on a single
//! evaluator task, strictly in arrival order; the only concurrency in here is
//! the transport reader staying responsive to PROFILE while an evaluation
//! blocks.

use crate::evaluator::Evaluator;
use crate::host::TestHost;
use crate::script_host::{ScriptHost, TestContext};
use futures::{SinkExt, StreamExt};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use testpool_common::config::WorkerThreads;
use testpool_common::protocol::{Request, Response, WireError, WorkerCodec};
use testpool_common::tracing::{TracingConfig, init_tracing};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerArgs {
    /// Socket the coordinator listens on for this worker.
    pub socket: PathBuf,
    pub project_name: String,
    pub threads: WorkerThreads,
    pub total_items: usize,
}

struct CurrentEval {
    name: String,
    started: Instant,
}

/// Process entry point for `__worker`. Builds the host environment (test
/// library loaded, global test-context record constructed, print-on-finish
/// off) and a runtime sized from the thread spec, then serves until the
/// coordinator hangs up.
pub fn main(args: WorkerArgs) -> anyhow::Result<()> {
    init_tracing(&TracingConfig::worker("testpool_worker"));
    let host: Arc<dyn TestHost> = Arc::new(ScriptHost::new(TestContext {
        project_name: args.project_name.clone(),
        total_items: args.total_items,
    }));
    run_with_host(args, host)
}

pub fn run_with_host(args: WorkerArgs, host: Arc<dyn TestHost>) -> anyhow::Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .worker_threads(args.threads.worker_count());
    if let Some(blocking) = args.threads.blocking_count() {
        builder.max_blocking_threads(blocking);
    }
    let runtime = builder.build()?;
    runtime.block_on(serve(args, host))
}

async fn serve(args: WorkerArgs, host: Arc<dyn TestHost>) -> anyhow::Result<()> {
    info!(socket = %args.socket.display(), "worker connecting");
    let stream = UnixStream::connect(&args.socket).await?;
    let (mut sink, mut requests) = Framed::new(stream, WorkerCodec).split();

    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            if let Err(err) = sink.send(response).await {
                warn!(error = %err, "worker transport write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let current: Arc<Mutex<Option<CurrentEval>>> = Arc::new(Mutex::new(None));
    let (eval_tx, eval_rx) = mpsc::unbounded_channel::<Request>();
    let evaluator_task = tokio::spawn(evaluator_loop(
        Arc::new(Evaluator::new(host)),
        eval_rx,
        response_tx.clone(),
        current.clone(),
    ));
    drop(response_tx);

    while let Some(frame) = requests.next().await {
        match frame {
            Ok(Request::Profile { nseconds, label }) => {
                profile(current.clone(), nseconds, label);
            }
            Ok(request) => {
                if eval_tx.send(request).is_err() {
                    break;
                }
            }
            Err(err) => {
                // Partial frame or corruption: treat as termination.
                warn!(error = %err, "worker transport read failed");
                break;
            }
        }
    }
    debug!("request stream finished, shutting down");
    drop(eval_tx);
    let _ = evaluator_task.await;
    let _ = writer.await;
    Ok(())
}

/// Single consumer: evaluations happen sequentially, in dispatch order.
async fn evaluator_loop(
    evaluator: Arc<Evaluator>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    current: Arc<Mutex<Option<CurrentEval>>>,
) {
    while let Some(request) = requests.recv().await {
        let response = match request {
            Request::Eval { request_id, spec } => {
                set_current(&current, Some(CurrentEval {
                    name: spec.name.clone(),
                    started: Instant::now(),
                }));
                let evaluator = evaluator.clone();
                let evaluated =
                    tokio::task::spawn_blocking(move || evaluator.eval_item(&spec)).await;
                set_current(&current, None);
                match evaluated {
                    Ok(result) => Response::Result { request_id, result },
                    Err(join_error) => Response::Error {
                        request_id,
                        error: WireError::new(format!("evaluation task failed: {join_error}")),
                    },
                }
            }
            Request::EvalCode { request_id, code } => {
                let evaluator = evaluator.clone();
                let evaluated =
                    tokio::task::spawn_blocking(move || evaluator.eval_code(&code)).await;
                match evaluated {
                    Ok(Ok(value)) => Response::Value { request_id, value },
                    Ok(Err(err)) => Response::Error {
                        request_id,
                        error: WireError::new(err.message),
                    },
                    Err(join_error) => Response::Error {
                        request_id,
                        error: WireError::new(format!("evaluation task failed: {join_error}")),
                    },
                }
            }
            Request::Profile { .. } => continue,
        };
        flush_stdio();
        if responses.send(response).is_err() {
            return;
        }
    }
}

fn set_current(current: &Mutex<Option<CurrentEval>>, value: Option<CurrentEval>) {
    *current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

/// Diagnostic stack capture: logs what this worker is doing, now and again at
/// the end of the requested window if the same evaluation is still running.
fn profile(current: Arc<Mutex<Option<CurrentEval>>>, nseconds: u64, label: String) {
    log_current(&current, &label);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(nseconds)).await;
        log_current(&current, &label);
    });
}

fn log_current(current: &Mutex<Option<CurrentEval>>, label: &str) {
    let current = current
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match current.as_ref() {
        Some(eval) => warn!(
            label = %label,
            item = %eval.name,
            elapsed_secs = eval.started.elapsed().as_secs_f64(),
            "profile: evaluation in flight"
        ),
        None => warn!(label = %label, "profile: worker idle"),
    }
}

/// The coordinator reads captures from disk as soon as the response arrives;
/// everything buffered must be on its way first.
fn flush_stdio() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
