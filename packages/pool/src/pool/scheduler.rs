// packages/pool/src/pool/scheduler.rs
//! Pool scheduler
//!
//! The scheduler is the single logical execution context of the pool: one
//! spawned task owns the worker set and the FIFO queue and consumes a single
//! event channel fed by the public handle and the per-worker I/O tasks. No
//! two handlers for the same worker's inbound messages ever run concurrently.
//!
//! Dispatch policy:
//!
//! - FIFO among queued tasks; the head of the queue goes out first
//! - least-recently-used tie-break among eligible workers
//! - below the cap, new workers are spawned, bounded by the backlog
//! - the pool replenishes to `min_workers` after any exit and at construction
//!
//! A worker dying with a task in flight fails that task (no retry) and is
//! replaced as needed.

use crate::pool::config::{PoolConfig, ResolvedConfig, WorkerKind};
use crate::pool::handle::TaskHandle;
use crate::pool::spawn;
use crate::pool::worker_handle::{InFlight, TaskResolver, WorkerHandle, WorkerState};
use crate::protocol::{ParentMessage, Request, Response, TaskOutput, WorkerMessage};
use crate::utils::errors::{PoolError, Result};
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Callback receiving mid-task events for one submitted task.
pub type EventCallback = Arc<dyn Fn(TaskOutput) + Send + Sync>;

/// Per-call options for [`Pool::exec_with_options`].
#[derive(Default, Clone)]
pub struct ExecOptions {
    /// Invoked for every event the worker emits while the task runs, before
    /// the task's terminal resolution.
    pub on_event: Option<EventCallback>,
    /// Buffers shipped with the call (moved on the thread transport).
    pub transferables: Vec<Bytes>,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub pending_tasks: usize,
}

/// One unit of submitted work.
pub(crate) struct Task {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
    pub transferables: Vec<Bytes>,
    pub resolver: TaskResolver,
    pub on_event: Option<EventCallback>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CancelKind {
    Cancel,
    Timeout,
}

pub(crate) enum PoolCommand {
    Submit(Task),
    Cancel {
        task: u64,
        reason: CancelKind,
    },
    Terminate {
        force: bool,
        timeout: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Everything the scheduler task reacts to.
pub(crate) enum PoolEvent {
    Command(PoolCommand),
    Message {
        worker: usize,
        message: WorkerMessage,
    },
    Exited {
        worker: usize,
        code: Option<i32>,
    },
    TerminateTimeout,
}

#[derive(Default)]
struct PoolShared {
    next_task_id: AtomicU64,
    terminated: AtomicBool,
    total_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    pending_tasks: AtomicUsize,
}

/// Bounded worker pool multiplexing method calls over isolated executors.
///
/// Must be created inside a Tokio runtime; the scheduler and the per-worker
/// I/O run as spawned tasks.
pub struct Pool {
    events: UnboundedSender<PoolEvent>,
    shared: Arc<PoolShared>,
    terminate_timeout: Duration,
}

impl Pool {
    /// Validate the configuration, pre-spawn `min_workers`, and start the
    /// scheduler.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let cfg = config.validate()?;
        let shared = Arc::new(PoolShared::default());
        let (events_tx, events_rx) = unbounded_channel();
        let terminate_timeout = cfg.terminate_timeout;

        info!(
            min_workers = cfg.min_workers,
            max_workers = cfg.max_workers,
            kind = ?cfg.kind,
            "initializing worker pool"
        );

        let mut scheduler = Scheduler {
            cfg,
            shared: shared.clone(),
            events_tx: events_tx.clone(),
            workers: Vec::new(),
            queue: VecDeque::new(),
            next_worker_id: 0,
            lru_tick: 0,
            terminating: None,
            shutdown: false,
        };
        scheduler.replenish_min()?;
        tokio::spawn(scheduler.run(events_rx));

        Ok(Self {
            events: events_tx,
            shared,
            terminate_timeout,
        })
    }

    /// Submit a named method call. The returned handle settles exactly once
    /// with the result or the error.
    pub fn exec(&self, method: impl Into<String>, params: Vec<Value>) -> TaskHandle {
        self.exec_with_options(method, params, ExecOptions::default())
    }

    /// Submit a named method call with an event callback and/or transferable
    /// buffers.
    pub fn exec_with_options(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        options: ExecOptions,
    ) -> TaskHandle {
        let method = method.into();
        let task_id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (resolver, handle) = TaskHandle::channel(task_id, self.events.clone());

        if self.shared.terminated.load(Ordering::Relaxed) {
            let _ = resolver.send(Err(PoolError::PoolTerminated));
            return handle;
        }
        if method.is_empty() {
            let _ = resolver.send(Err(PoolError::Configuration(
                "method name must not be empty".into(),
            )));
            return handle;
        }

        let task = Task {
            id: task_id,
            method,
            params,
            transferables: options.transferables,
            resolver,
            on_event: options.on_event,
        };
        if let Err(rejected) = self
            .events
            .send(PoolEvent::Command(PoolCommand::Submit(task)))
        {
            if let PoolEvent::Command(PoolCommand::Submit(task)) = rejected.0 {
                let _ = task.resolver.send(Err(PoolError::PoolTerminated));
            }
        }
        handle
    }

    /// Current worker and queue counters.
    pub fn stats(&self) -> PoolStats {
        let total = self.shared.total_workers.load(Ordering::Relaxed);
        let busy = self.shared.busy_workers.load(Ordering::Relaxed).min(total);
        PoolStats {
            total_workers: total,
            busy_workers: busy,
            idle_workers: total - busy,
            pending_tasks: self.shared.pending_tasks.load(Ordering::Relaxed),
        }
    }

    /// Shut the pool down. Soft termination rejects queued tasks, lets
    /// in-flight work finish within the grace window, then kills stragglers;
    /// forced termination kills immediately. `exec` fails afterwards.
    pub async fn terminate(&self, force: bool, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.terminate_timeout);
        let (done, ack) = oneshot::channel();
        if self
            .events
            .send(PoolEvent::Command(PoolCommand::Terminate {
                force,
                timeout,
                done,
            }))
            .is_err()
        {
            return Ok(());
        }
        let _ = ack.await;
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Leave no child processes behind when the pool goes away without an
        // explicit terminate.
        if !self.shared.terminated.load(Ordering::Relaxed) {
            let (done, _ack) = oneshot::channel();
            let _ = self.events.send(PoolEvent::Command(PoolCommand::Terminate {
                force: true,
                timeout: Duration::ZERO,
                done,
            }));
        }
    }
}

struct Terminating {
    done: Vec<oneshot::Sender<()>>,
}

struct Scheduler {
    cfg: ResolvedConfig,
    shared: Arc<PoolShared>,
    events_tx: UnboundedSender<PoolEvent>,
    workers: Vec<WorkerHandle>,
    queue: VecDeque<Task>,
    next_worker_id: usize,
    lru_tick: u64,
    terminating: Option<Terminating>,
    shutdown: bool,
}

impl Scheduler {
    async fn run(mut self, mut events: UnboundedReceiver<PoolEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
            if self.shutdown {
                break;
            }
        }
        debug!("pool scheduler stopped");
    }

    fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Command(PoolCommand::Submit(task)) => self.on_submit(task),
            PoolEvent::Command(PoolCommand::Cancel { task, reason }) => {
                self.on_cancel(task, reason)
            }
            PoolEvent::Command(PoolCommand::Terminate {
                force,
                timeout,
                done,
            }) => self.on_terminate(force, timeout, done),
            PoolEvent::Message { worker, message } => self.on_message(worker, message),
            PoolEvent::Exited { worker, code } => self.on_exited(worker, code),
            PoolEvent::TerminateTimeout => self.on_terminate_timeout(),
        }
    }

    fn on_submit(&mut self, task: Task) {
        if self.terminating.is_some() {
            let _ = task.resolver.send(Err(PoolError::PoolTerminated));
            return;
        }
        trace!(task = task.id, method = %task.method, "task enqueued");
        self.queue.push_back(task);
        self.shared.pending_tasks.fetch_add(1, Ordering::Relaxed);
        self.dispatch();
    }

    /// Match queued tasks to idle workers, growing the pool up to the cap
    /// when the backlog warrants it.
    fn dispatch(&mut self) {
        if self.terminating.is_some() {
            return;
        }
        loop {
            if self.queue.is_empty() {
                break;
            }
            let candidate = self
                .workers
                .iter()
                .enumerate()
                .filter(|(_, w)| w.eligible())
                .min_by_key(|(_, w)| w.last_used)
                .map(|(idx, _)| idx);
            if let Some(idx) = candidate {
                let Some(task) = self.queue.pop_front() else {
                    break;
                };
                self.shared.pending_tasks.fetch_sub(1, Ordering::Relaxed);
                self.bind(idx, task);
                continue;
            }

            let initializing = self
                .workers
                .iter()
                .filter(|w| w.state == WorkerState::Initializing)
                .count();
            if self.workers.len() < self.cfg.max_workers && initializing < self.queue.len() {
                if let Err(err) = self.spawn_worker() {
                    warn!(%err, "failed to spawn worker");
                    break;
                }
                continue;
            }
            break;
        }
    }

    fn bind(&mut self, idx: usize, task: Task) {
        let Task {
            id: task_id,
            method,
            params,
            transferables,
            resolver,
            on_event,
        } = task;

        self.lru_tick += 1;
        let worker = &mut self.workers[idx];
        let request_id = worker.next_request_id;
        worker.next_request_id += 1;
        worker.last_used = self.lru_tick;
        worker.state = WorkerState::Busy;
        self.shared.busy_workers.fetch_add(1, Ordering::Relaxed);

        trace!(worker = worker.id, task = task_id, method = %method, "task dispatched");
        worker.pending.insert(
            request_id,
            InFlight {
                task_id,
                resolver,
                on_event,
            },
        );
        let sent = worker.send(ParentMessage::Request(Request {
            id: request_id,
            method,
            params,
            transferables,
        }));
        if !sent {
            // The exit event for this worker will fail the task and heal
            // the pool.
            warn!(worker = worker.id, "worker channel closed during dispatch");
        }
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let mut opts = self.cfg.spawn_template.clone();
        if let Some(hook) = &self.cfg.on_create_worker {
            if let Some(overridden) = hook(&opts) {
                opts = overridden;
            }
        }

        let spawned = match self.cfg.kind {
            WorkerKind::Thread => {
                let registry = self.cfg.registry.clone().ok_or_else(|| {
                    PoolError::Configuration("thread workers require a method registry".into())
                })?;
                spawn::spawn_thread(id, registry, self.events_tx.clone())?
            }
            WorkerKind::Process => spawn::spawn_process(id, &opts, self.events_tx.clone())?,
        };

        self.workers
            .push(WorkerHandle::new(id, self.cfg.kind, opts, spawned));
        self.shared.total_workers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn replenish_min(&mut self) -> Result<()> {
        while self.workers.len() < self.cfg.min_workers {
            self.spawn_worker()?;
        }
        Ok(())
    }

    fn on_message(&mut self, worker_id: usize, message: WorkerMessage) {
        let Some(idx) = self.workers.iter().position(|w| w.id == worker_id) else {
            trace!(worker = worker_id, "message from removed worker ignored");
            return;
        };
        match message {
            WorkerMessage::Ready => {
                let worker = &mut self.workers[idx];
                if worker.state == WorkerState::Initializing {
                    debug!(worker = worker.id, "worker ready");
                    worker.state = WorkerState::Ready;
                }
                self.dispatch();
            }
            WorkerMessage::Event(event) => {
                let worker = &self.workers[idx];
                if let Some(inflight) = worker.pending.get(&event.id) {
                    if let Some(on_event) = &inflight.on_event {
                        on_event(TaskOutput::new(event.payload, event.transferables));
                    }
                }
            }
            WorkerMessage::Response(response) => self.on_response(idx, response),
        }
    }

    fn on_response(&mut self, idx: usize, response: Response) {
        let worker = &mut self.workers[idx];
        let Some(inflight) = worker.pending.remove(&response.id) else {
            trace!(worker = worker.id, request = response.id, "response for unknown request");
            return;
        };
        if worker.state == WorkerState::Busy {
            worker.state = if worker.termination_requested {
                WorkerState::Terminating
            } else {
                WorkerState::Ready
            };
            self.shared.busy_workers.fetch_sub(1, Ordering::Relaxed);
        }

        let settled = match response.error {
            Some(error) => Err(error.into_pool_error()),
            None => Ok(TaskOutput::new(
                response.result.unwrap_or(Value::Null),
                response.transferables,
            )),
        };
        trace!(task = inflight.task_id, ok = settled.is_ok(), "task settled");
        let _ = inflight.resolver.send(settled);
        self.dispatch();
    }

    fn on_exited(&mut self, worker_id: usize, code: Option<i32>) {
        let Some(idx) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };
        let mut worker = self.workers.remove(idx);
        self.shared.total_workers.fetch_sub(1, Ordering::Relaxed);
        if worker.state == WorkerState::Busy {
            self.shared.busy_workers.fetch_sub(1, Ordering::Relaxed);
        }

        let expected = worker.termination_requested && worker.pending.is_empty();
        if expected {
            debug!(worker = worker.id, kind = ?worker.kind, ?code, "worker exited");
        } else {
            warn!(worker = worker.id, kind = ?worker.kind, ?code, "worker exited unexpectedly");
        }
        for (_, inflight) in worker.pending.drain() {
            let reason = match code {
                Some(c) => format!("worker exited with code {c}"),
                None => "worker exited".to_string(),
            };
            let _ = inflight.resolver.send(Err(PoolError::WorkerTerminated(reason)));
        }
        if let Some(hook) = &self.cfg.on_terminate_worker {
            hook(&worker.spawn_opts);
        }

        if self.terminating.is_some() {
            if self.workers.is_empty() {
                self.complete_terminate();
            }
        } else {
            if let Err(err) = self.replenish_min() {
                warn!(%err, "failed to replenish pool after worker exit");
            }
            self.dispatch();
        }
    }

    fn on_cancel(&mut self, task_id: u64, reason: CancelKind) {
        let error = || match reason {
            CancelKind::Cancel => PoolError::Cancelled,
            CancelKind::Timeout => PoolError::TimedOut,
        };

        // Still queued: remove and reject.
        if let Some(pos) = self.queue.iter().position(|t| t.id == task_id) {
            if let Some(task) = self.queue.remove(pos) {
                self.shared.pending_tasks.fetch_sub(1, Ordering::Relaxed);
                debug!(task = task_id, ?reason, "queued task cancelled");
                let _ = task.resolver.send(Err(error()));
            }
            return;
        }

        // In flight: the hosting worker goes down with the task.
        let hosting = self
            .workers
            .iter()
            .position(|w| w.pending.values().any(|p| p.task_id == task_id));
        let Some(idx) = hosting else {
            trace!(task = task_id, "cancel for settled task ignored");
            return;
        };
        let mut worker = self.workers.remove(idx);
        self.shared.total_workers.fetch_sub(1, Ordering::Relaxed);
        if worker.state == WorkerState::Busy {
            self.shared.busy_workers.fetch_sub(1, Ordering::Relaxed);
        }
        debug!(
            worker = worker.id,
            task = task_id,
            ?reason,
            "killing worker to cancel in-flight task"
        );
        for (_, inflight) in worker.pending.drain() {
            let outcome = if inflight.task_id == task_id {
                error()
            } else {
                PoolError::WorkerTerminated("worker killed by cancellation".into())
            };
            let _ = inflight.resolver.send(Err(outcome));
        }
        worker.force_kill();
        if let Some(hook) = &self.cfg.on_terminate_worker {
            hook(&worker.spawn_opts);
        }
        if let Err(err) = self.replenish_min() {
            warn!(%err, "failed to replenish pool after cancellation");
        }
        self.dispatch();
    }

    fn on_terminate(&mut self, force: bool, timeout: Duration, done: oneshot::Sender<()>) {
        self.shared.terminated.store(true, Ordering::Relaxed);

        for task in self.queue.drain(..) {
            let _ = task.resolver.send(Err(PoolError::PoolTerminated));
        }
        self.shared.pending_tasks.store(0, Ordering::Relaxed);

        if let Some(terminating) = self.terminating.as_mut() {
            terminating.done.push(done);
            if force {
                self.force_kill_all();
                self.complete_terminate();
            }
            return;
        }

        info!(force, ?timeout, workers = self.workers.len(), "terminating pool");
        self.terminating = Some(Terminating { done: vec![done] });

        if force {
            self.force_kill_all();
            self.complete_terminate();
            return;
        }
        if self.workers.is_empty() {
            self.complete_terminate();
            return;
        }

        for worker in &mut self.workers {
            worker.request_terminate();
        }
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(PoolEvent::TerminateTimeout);
        });
    }

    fn on_terminate_timeout(&mut self) {
        if self.terminating.is_none() {
            return;
        }
        if !self.workers.is_empty() {
            warn!(
                remaining = self.workers.len(),
                "terminate grace window elapsed, killing remaining workers"
            );
            self.force_kill_all();
        }
        self.complete_terminate();
    }

    fn force_kill_all(&mut self) {
        for mut worker in std::mem::take(&mut self.workers) {
            self.shared.total_workers.fetch_sub(1, Ordering::Relaxed);
            if worker.state == WorkerState::Busy {
                self.shared.busy_workers.fetch_sub(1, Ordering::Relaxed);
            }
            for (_, inflight) in worker.pending.drain() {
                let _ = inflight
                    .resolver
                    .send(Err(PoolError::WorkerTerminated("pool terminated".into())));
            }
            worker.force_kill();
            if let Some(hook) = &self.cfg.on_terminate_worker {
                hook(&worker.spawn_opts);
            }
        }
    }

    fn complete_terminate(&mut self) {
        if let Some(terminating) = self.terminating.as_mut() {
            for tx in terminating.done.drain(..) {
                let _ = tx.send(());
            }
        }
        self.shutdown = true;
        info!("pool terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::config::MinWorkers;
    use crate::runtime::MethodRegistry;
    use serde_json::json;

    fn arith_registry() -> Arc<MethodRegistry> {
        let mut registry = MethodRegistry::new();
        registry.register("add", |_ctx, params: Vec<Value>| {
            Ok(json!(
                params[0].as_i64().unwrap() + params[1].as_i64().unwrap()
            ))
        });
        Arc::new(registry)
    }

    fn thread_pool(min: usize, max: usize) -> Pool {
        Pool::new(PoolConfig {
            min_workers: MinWorkers::Fixed(min),
            max_workers: Some(max),
            registry: Some(arith_registry()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pool_starts_with_min_workers() {
        let pool = thread_pool(2, 4);
        let stats = pool.stats();
        assert_eq!(stats.total_workers, 2);
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.idle_workers, 2);
        pool.terminate(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_resolves() {
        let pool = thread_pool(0, 2);
        let out = pool.exec("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(out.value, json!(5));
        pool.terminate(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_method_name_is_rejected() {
        let pool = thread_pool(0, 1);
        let result = pool.exec("", Vec::new()).await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
        pool.terminate(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_after_terminate_fails_immediately() {
        let pool = thread_pool(0, 1);
        pool.terminate(false, None).await.unwrap();
        let result = pool.exec("add", vec![json!(1), json!(1)]).await;
        assert!(matches!(result, Err(PoolError::PoolTerminated)));
    }

    #[tokio::test]
    async fn test_task_ids_increase() {
        let pool = thread_pool(0, 1);
        let a = pool.exec("add", vec![json!(1), json!(1)]);
        let b = pool.exec("add", vec![json!(1), json!(1)]);
        assert!(b.task_id() > a.task_id());
        let _ = a.await;
        let _ = b.await;
        pool.terminate(true, None).await.unwrap();
    }
}
