// packages/pool/src/pool/worker_handle.rs
//! Parent-side handle for one executor
//!
//! Owns the per-worker request-id counter and the pending-task map. A worker
//! is eligible for dispatch iff it is ready with nothing in flight; the
//! baseline keeps at most one request outstanding per worker.

use crate::pool::config::WorkerKind;
use crate::pool::scheduler::EventCallback;
use crate::pool::spawn::{self, SpawnOpts, SpawnedWorker};
use crate::protocol::{ParentMessage, TaskOutput};
use crate::utils::errors::Result as PoolResult;
use std::collections::HashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;

/// Resolves the caller's task handle exactly once.
pub(crate) type TaskResolver = oneshot::Sender<PoolResult<TaskOutput>>;

/// Bookkeeping for one dispatched request.
pub(crate) struct InFlight {
    pub task_id: u64,
    pub resolver: TaskResolver,
    pub on_event: Option<EventCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Initializing,
    Ready,
    Busy,
    Terminating,
    Terminated,
}

pub(crate) struct WorkerHandle {
    pub id: usize,
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub termination_requested: bool,
    pub next_request_id: u64,
    /// Dispatch tick of the last binding; lowest value wins ties among
    /// eligible workers to spread wear.
    pub last_used: u64,
    pub pending: HashMap<u64, InFlight>,
    pub spawn_opts: SpawnOpts,
    sender: UnboundedSender<ParentMessage>,
    pid: Option<u32>,
}

impl WorkerHandle {
    pub fn new(id: usize, kind: WorkerKind, spawn_opts: SpawnOpts, spawned: SpawnedWorker) -> Self {
        Self {
            id,
            kind,
            state: WorkerState::Initializing,
            termination_requested: false,
            next_request_id: 1,
            last_used: 0,
            pending: HashMap::new(),
            spawn_opts,
            sender: spawned.sender,
            pid: spawned.pid,
        }
    }

    pub fn eligible(&self) -> bool {
        self.state == WorkerState::Ready && self.pending.is_empty() && !self.termination_requested
    }

    pub fn send(&self, message: ParentMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Ask the worker to exit gracefully. A busy worker finishes its current
    /// task first; the serve loop reads the sentinel right after.
    pub fn request_terminate(&mut self) {
        self.termination_requested = true;
        if self.state != WorkerState::Busy {
            self.state = WorkerState::Terminating;
        }
        self.send(ParentMessage::Terminate);
    }

    /// Kill the executor without waiting. Process workers get SIGKILL; thread
    /// workers see their channel close and park out after the current
    /// handler returns.
    pub fn force_kill(&mut self) {
        self.state = WorkerState::Terminated;
        if let Some(pid) = self.pid {
            spawn::kill_process(self.id, pid);
        }
        let (closed, _) = unbounded_channel();
        self.sender = closed;
    }
}
