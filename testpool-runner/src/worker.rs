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

//! The coordinator-side handle of one worker subprocess: spawn, handshake,
//! request multiplexing, termination. A handle moves through
//! `Running -> {Closing | Terminating} -> Closed` and is never reused after
//! leaving `Running`; replacement means a fresh handle on a fresh socket.

use crate::error::WorkerError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use testpool_common::config::WorkerThreads;
use testpool_common::model::{CodeSource, TestResult};
use testpool_common::protocol::{
    CoordinatorCodec, EvalSpec, Request, RequestId, Response,
};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

const START_ACCEPT_TIMEOUT: Duration = Duration::from_secs(20);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

pub const START_ATTEMPTS: u32 = 3;
pub const START_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How the coordinator spawns a worker. The command line is host-defined;
/// the default front end re-executes itself with a hidden `__worker`
/// subcommand and this launcher only fills in the per-worker socket.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    pub program: PathBuf,
    pub project_name: String,
    pub threads: WorkerThreads,
    pub total_items: usize,
    /// Evaluated on the worker during the handshake, after the host test
    /// environment is loaded.
    pub init_code: Option<CodeSource>,
}

impl WorkerLauncher {
    fn command(&self, socket: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("__worker")
            .arg("--socket")
            .arg(socket)
            .arg("--project-name")
            .arg(&self.project_name)
            .arg("--threads")
            .arg(self.threads.to_string())
            .arg("--total-items")
            .arg(self.total_items.to_string());
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Closing,
    Terminating,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Response, WorkerError>>>;

enum WriterCommand {
    Send(Request),
    Shutdown,
}

pub struct Worker {
    pid: u32,
    state: Mutex<WorkerState>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    pending: Arc<Mutex<PendingMap>>,
    next_request_id: AtomicU64,
    busy: AtomicBool,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a child, waits for it to connect back on `socket_path` and
    /// performs the handshake (worker boots its host environment, then the
    /// first EVAL_CODE carries the init expression and must answer VALUE).
    /// Returns only when the child has signaled ready.
    pub async fn start(
        launcher: &WorkerLauncher,
        socket_path: &Path,
    ) -> Result<Arc<Worker>, WorkerError> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)
            .map_err(|err| WorkerError::StartFailure(format!("cannot bind {}: {err}", socket_path.display())))?;

        let mut child = launcher
            .command(socket_path)
            .spawn()
            .map_err(|err| WorkerError::StartFailure(format!("cannot spawn worker: {err}")))?;
        let pid = match child.id() {
            Some(pid) => pid,
            None => return Err(WorkerError::StartFailure("worker exited during spawn".to_string())),
        };
        info!(pid, socket = %socket_path.display(), "worker spawned");

        let accepted = tokio::select! {
            biased;
            accepted = tokio::time::timeout(START_ACCEPT_TIMEOUT, listener.accept()) => accepted,
            status = child.wait() => {
                return Err(WorkerError::StartFailure(format!(
                    "worker exited before connecting: {status:?}"
                )));
            }
        };
        let stream = match accepted {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                let _ = child.kill().await;
                return Err(WorkerError::StartFailure(format!("accept failed: {err}")));
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(WorkerError::StartFailure(format!(
                    "worker did not connect within {START_ACCEPT_TIMEOUT:?}"
                )));
            }
        };
        // The listener's socket file is no longer needed once connected.
        let _ = std::fs::remove_file(socket_path);

        let (sink, stream) = Framed::new(stream, CoordinatorCodec).split();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let worker = Arc::new(Worker {
            pid,
            state: Mutex::new(WorkerState::Running),
            writer_tx,
            pending: pending.clone(),
            next_request_id: AtomicU64::new(1),
            busy: AtomicBool::new(false),
            exit_rx,
            tasks: Mutex::new(Vec::new()),
        });

        let reader = tokio::spawn(reader_task(stream, pending.clone(), worker.clone()));
        let writer = tokio::spawn(writer_task(sink, writer_rx, worker.clone()));
        let monitor = tokio::spawn(monitor_task(child, worker.clone(), exit_tx));
        {
            let mut tasks = lock(&worker.tasks);
            tasks.push(reader);
            tasks.push(writer);
            tasks.push(monitor);
        }

        let init = launcher
            .init_code
            .clone()
            .unwrap_or_else(|| CodeSource::anonymous(""));
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, worker.eval_code(init)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                worker.terminate().await;
                return Err(WorkerError::StartFailure(format!("handshake failed: {err}")));
            }
            Err(_) => {
                worker.terminate().await;
                return Err(WorkerError::StartFailure(format!(
                    "handshake timed out after {HANDSHAKE_TIMEOUT:?}"
                )));
            }
        }
        debug!(pid, "worker ready");
        Ok(worker)
    }

    /// [`Worker::start`] with the documented retry discipline: up to two
    /// retries with a short delay before the failure propagates.
    pub async fn start_with_retries(
        launcher: &WorkerLauncher,
        socket_path: impl Fn(u32) -> PathBuf,
    ) -> Result<Arc<Worker>, WorkerError> {
        let mut last_error = None;
        for attempt in 0..START_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(START_RETRY_DELAY).await;
            }
            match Worker::start(launcher, &socket_path(attempt)).await {
                Ok(worker) => return Ok(worker),
                Err(err) => {
                    warn!(attempt, error = %err, "worker start attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            WorkerError::StartFailure("worker start failed with no attempts".to_string())
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == WorkerState::Running
    }

    /// Sends one EVAL request. The future resolves with the worker's result,
    /// or with [`WorkerError::Terminated`] if the child dies first. At most
    /// one EVAL may be in flight per worker.
    pub async fn eval_item(&self, spec: EvalSpec) -> Result<TestResult, WorkerError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::Busy);
        }
        let outcome = self
            .request(|request_id| Request::Eval { request_id, spec })
            .await;
        self.busy.store(false, Ordering::SeqCst);
        match outcome? {
            Response::Result { result, .. } => Ok(result),
            Response::Error { error, .. } => Err(WorkerError::Request(error.message)),
            Response::Value { .. } => {
                Err(WorkerError::Request("unexpected VALUE response to EVAL".to_string()))
            }
        }
    }

    /// Evaluates an opaque expression on the worker; used by the handshake,
    /// the GC hints between items and the test-end hook.
    pub async fn eval_code(&self, code: CodeSource) -> Result<serde_json::Value, WorkerError> {
        let response = self
            .request(|request_id| Request::EvalCode { request_id, code })
            .await?;
        match response {
            Response::Value { value, .. } => Ok(value),
            Response::Error { error, .. } => Err(WorkerError::Request(error.message)),
            Response::Result { .. } => {
                Err(WorkerError::Request("unexpected RESULT response to EVAL_CODE".to_string()))
            }
        }
    }

    /// Fire-and-forget diagnostic stack capture request.
    pub fn profile(&self, nseconds: u64, label: impl Into<String>) {
        let _ = self.writer_tx.send(WriterCommand::Send(Request::Profile {
            nseconds,
            label: label.into(),
        }));
    }

    /// Fraction of host memory in use. Deliberately not a worker-local
    /// measurement: the recycling policy reacts to pressure on the machine.
    pub fn memory_percent() -> f64 {
        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }

    async fn request(
        &self,
        build: impl FnOnce(RequestId) -> Request,
    ) -> Result<Response, WorkerError> {
        if !self.is_running() {
            return Err(WorkerError::Terminated(self.exit_signal()));
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        if self
            .writer_tx
            .send(WriterCommand::Send(build(request_id)))
            .is_err()
        {
            lock(&self.pending).remove(&request_id);
            return Err(WorkerError::Terminated(self.exit_signal()));
        }
        // The monitor may have drained `pending` between the insert above
        // and the send; leaving our entry behind would hang the await below.
        if !self.is_running()
            && let Some(tx) = lock(&self.pending).remove(&request_id)
        {
            let _ = tx.send(Err(WorkerError::Terminated(self.exit_signal())));
        }
        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without an explicit resolution: the transport
            // tore down while we were waiting.
            Err(_) => Err(WorkerError::Terminated(self.exit_signal())),
        }
    }

    fn exit_signal(&self) -> Option<i32> {
        self.exit_rx.borrow().as_ref().and_then(|exit| exit.signal)
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// SIGTERM, a short grace period, then SIGKILL. Idempotent; always waits
    /// for the child to be gone before returning.
    pub async fn terminate(&self) {
        let already = {
            let mut state = lock(&self.state);
            match *state {
                WorkerState::Closed => return,
                WorkerState::Terminating => true,
                _ => {
                    *state = WorkerState::Terminating;
                    false
                }
            }
        };
        if !already {
            debug!(pid = self.pid, "terminating worker");
            let _ = signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM);
        }
        if self.wait_exit(TERMINATE_GRACE).await.is_none() {
            warn!(pid = self.pid, "worker ignored SIGTERM, killing");
            let _ = signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
            let _ = self.wait_exit(CLOSE_TIMEOUT).await;
        }
    }

    /// Graceful shutdown: close the request channel so the worker sees EOF
    /// and exits; blocks until the child is gone and the transport tasks are
    /// finished. Falls back to termination if the child lingers.
    pub async fn close(&self) {
        let already_closed = {
            let mut state = lock(&self.state);
            if *state == WorkerState::Closed || *state == WorkerState::Terminating {
                true
            } else {
                *state = WorkerState::Closing;
                false
            }
        };
        if already_closed {
            self.join_tasks().await;
            return;
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        if self.wait_exit(CLOSE_TIMEOUT).await.is_none() {
            self.terminate().await;
        }
        self.join_tasks().await;
    }

    async fn wait_exit(&self, timeout: Duration) -> Option<ExitInfo> {
        let mut exit_rx = self.exit_rx.clone();
        let wait = async {
            loop {
                if let Some(exit) = *exit_rx.borrow_and_update() {
                    return exit;
                }
                if exit_rx.changed().await.is_err() {
                    // Monitor gone without reporting; treat as exited.
                    return ExitInfo { code: None, signal: None };
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    async fn join_tasks(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Called by the transport and monitor tasks when the connection or the
    /// process is gone: resolves every pending future with the termination
    /// error so callers never hang.
    fn fail_pending(&self, signal: Option<i32>) {
        let pending = std::mem::take(&mut *lock(&self.pending));
        for (_, tx) in pending {
            let _ = tx.send(Err(WorkerError::Terminated(signal)));
        }
    }

    fn mark_closed(&self) {
        *lock(&self.state) = WorkerState::Closed;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn reader_task(
    mut stream: SplitStream<Framed<UnixStream, CoordinatorCodec>>,
    pending: Arc<Mutex<PendingMap>>,
    worker: Arc<Worker>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(response) => {
                let tx = lock(&pending).remove(&response.request_id());
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => debug!(
                        request_id = response.request_id(),
                        "response for an abandoned request"
                    ),
                }
            }
            Err(err) => {
                // Partial frame on EOF lands here too: termination.
                warn!(pid = worker.pid, error = %err, "worker transport read failed");
                worker.terminate().await;
                return;
            }
        }
    }
    debug!(pid = worker.pid, "worker transport read ended");
}

async fn writer_task(
    mut sink: SplitSink<Framed<UnixStream, CoordinatorCodec>, Request>,
    mut writer_rx: mpsc::UnboundedReceiver<WriterCommand>,
    worker: Arc<Worker>,
) {
    while let Some(command) = writer_rx.recv().await {
        match command {
            WriterCommand::Send(request) => {
                if let Err(err) = sink.send(request).await {
                    // Write errors are promoted to termination.
                    warn!(pid = worker.pid, error = %err, "worker transport write failed");
                    writer_rx.close();
                    worker.terminate().await;
                    return;
                }
            }
            WriterCommand::Shutdown => {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

async fn monitor_task(
    mut child: tokio::process::Child,
    worker: Arc<Worker>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let exit = match child.wait().await {
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            ExitInfo {
                code: status.code(),
                signal: status.signal(),
            }
        }
        Err(err) => {
            warn!(pid = worker.pid, error = %err, "waiting for worker failed");
            ExitInfo { code: None, signal: None }
        }
    };
    debug!(pid = worker.pid, code = ?exit.code, signal = ?exit.signal, "worker exited");
    worker.mark_closed();
    let _ = exit_tx.send(Some(exit));
    worker.fail_pending(exit.signal);
}
