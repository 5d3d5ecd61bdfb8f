// packages/pool/src/pool/spawn.rs
//! Executor spawning
//!
//! Two executor flavors behind one interface:
//!
//! - **Process**: a child process with piped stdio. A writer task serializes
//!   outbound messages onto stdin, a reader task parses stdout lines, stderr
//!   is drained into the log, and a supervisor reports the exit code.
//! - **Thread**: a dedicated OS thread hosting a current-thread Tokio runtime
//!   that drives the same RPC loop over channels.
//!
//! Either way the scheduler ends up with an outbound sender and receives the
//! worker's traffic on its event channel.

use crate::pool::config::WorkerKind;
use crate::pool::scheduler::PoolEvent;
use crate::protocol::{ParentMessage, WorkerMessage};
use crate::runtime::{MethodRegistry, WorkerRuntime};
use crate::utils::errors::{PoolError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, warn};

/// Options a single worker is spawned with. Passed to the create/terminate
/// hooks; `on_create_worker` may return an adjusted copy per worker.
#[derive(Debug, Clone)]
pub struct SpawnOpts {
    pub kind: WorkerKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env_vars: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
}

/// Live transport endpoints for a freshly spawned worker.
pub(crate) struct SpawnedWorker {
    pub sender: UnboundedSender<ParentMessage>,
    pub pid: Option<u32>,
}

/// Spawn a process worker and wire its stdio to the pool's event channel.
pub(crate) fn spawn_process(
    worker_id: usize,
    opts: &SpawnOpts,
    events: UnboundedSender<PoolEvent>,
) -> Result<SpawnedWorker> {
    let command = opts.command.as_deref().ok_or_else(|| {
        PoolError::Configuration("process worker has no command configured".into())
    })?;
    let program = which::which(command).map_err(|err| {
        PoolError::Configuration(format!("worker executable \"{command}\" not found: {err}"))
    })?;
    debug!(worker = worker_id, program = %program.display(), "spawning process worker");

    let mut cmd = Command::new(&program);
    cmd.args(&opts.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &opts.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &opts.work_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PoolError::Transport(std::io::Error::other("worker stdin not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PoolError::Transport(std::io::Error::other("worker stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PoolError::Transport(std::io::Error::other("worker stderr not captured")))?;

    let (tx, mut rx) = unbounded_channel::<ParentMessage>();

    // Writer: serialize outbound messages onto the child's stdin. Closing the
    // channel drops stdin, which the worker observes as a disconnect.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let line = match msg.to_json() {
                Ok(line) => line,
                Err(err) => {
                    warn!(worker = worker_id, %err, "failed to encode outbound message");
                    continue;
                }
            };
            if stdin.write_all(line.as_bytes()).await.is_err()
                || stdin.write_all(b"\n").await.is_err()
                || stdin.flush().await.is_err()
            {
                break;
            }
        }
    });

    // Reader: parse stdout lines into protocol messages.
    let reader_events = events.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match WorkerMessage::from_json(line) {
                        Ok(message) => {
                            if reader_events
                                .send(PoolEvent::Message {
                                    worker: worker_id,
                                    message,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(worker = worker_id, %err, "dropping malformed worker message")
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(worker = worker_id, %err, "worker stdout read failed");
                    break;
                }
            }
        }
    });

    // Stderr belongs to the worker's diagnostics; keep it visible.
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(worker = worker_id, "worker stderr: {line}");
        }
    });

    // Supervisor: report the exit code back to the scheduler.
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(worker = worker_id, %err, "waiting on worker failed");
                None
            }
        };
        debug!(worker = worker_id, ?code, "process worker exited");
        let _ = events.send(PoolEvent::Exited {
            worker: worker_id,
            code,
        });
    });

    Ok(SpawnedWorker { sender: tx, pid })
}

/// Spawn a thread worker: a dedicated OS thread running the RPC loop on its
/// own single-threaded runtime.
pub(crate) fn spawn_thread(
    worker_id: usize,
    registry: Arc<MethodRegistry>,
    events: UnboundedSender<PoolEvent>,
) -> Result<SpawnedWorker> {
    let (tx_parent, rx_parent) = unbounded_channel::<ParentMessage>();
    let (tx_worker, mut rx_worker) = unbounded_channel::<WorkerMessage>();

    // Forwarder: worker traffic onto the pool's event channel; a closed
    // worker channel doubles as the exit notification.
    tokio::spawn(async move {
        while let Some(message) = rx_worker.recv().await {
            if events
                .send(PoolEvent::Message {
                    worker: worker_id,
                    message,
                })
                .is_err()
            {
                return;
            }
        }
        let _ = events.send(PoolEvent::Exited {
            worker: worker_id,
            code: None,
        });
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    debug!(worker = worker_id, "spawning thread worker");
    let _detached = std::thread::Builder::new()
        .name(format!("workpool-worker-{worker_id}"))
        .spawn(move || {
            let serve = WorkerRuntime::new((*registry).clone());
            runtime.block_on(serve.run_channel(rx_parent, tx_worker));
        })?;

    Ok(SpawnedWorker {
        sender: tx_parent,
        pid: None,
    })
}

/// Forcefully kill a process worker. The graceful path is always the
/// terminate sentinel; this is the hammer behind the grace window.
pub(crate) fn kill_process(worker_id: usize, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    debug!(worker = worker_id, pid, "sending SIGKILL");
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(worker = worker_id, pid, %err, "SIGKILL failed, process already gone");
    }
}
