// packages/pool/src/pool/handle.rs
//! Caller-facing task handle
//!
//! A [`TaskHandle`] settles exactly once with the task's result or error.
//! It is awaitable (`IntoFuture`), so success/failure chaining is ordinary
//! `Result` handling on the awaited value; a handle awaited after settlement
//! observes the settled value immediately. Cancellation and timeout resolve
//! through the scheduler's task registry by id rather than through a parent
//! link, which keeps the handle free of back references.

use crate::pool::scheduler::{CancelKind, PoolCommand, PoolEvent};
use crate::protocol::TaskOutput;
use crate::utils::errors::{PoolError, Result};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Cancellable, timeout-capable handle for one submitted task.
pub struct TaskHandle {
    task_id: u64,
    receiver: oneshot::Receiver<Result<TaskOutput>>,
    events: UnboundedSender<PoolEvent>,
    deadline: Option<Duration>,
}

impl TaskHandle {
    pub(crate) fn channel(
        task_id: u64,
        events: UnboundedSender<PoolEvent>,
    ) -> (oneshot::Sender<Result<TaskOutput>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                task_id,
                receiver: rx,
                events,
                deadline: None,
            },
        )
    }

    /// Pool-unique id of the underlying task.
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Cancel the task: a queued task is removed and rejected, an in-flight
    /// task takes its hosting worker down with it. Cancelling a settled task
    /// is a no-op.
    pub fn cancel(&self) {
        let _ = self.events.send(PoolEvent::Command(PoolCommand::Cancel {
            task: self.task_id,
            reason: CancelKind::Cancel,
        }));
    }

    /// Arm a deadline: when it elapses before settlement the task is
    /// cancelled and the await resolves with [`PoolError::TimedOut`].
    /// Settling first disarms the timer.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.deadline = Some(duration);
        self
    }
}

impl IntoFuture for TaskHandle {
    type Output = Result<TaskOutput>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        let TaskHandle {
            task_id,
            mut receiver,
            events,
            deadline,
        } = self;
        Box::pin(async move {
            match deadline {
                None => match receiver.await {
                    Ok(settled) => settled,
                    Err(_) => Err(PoolError::PoolTerminated),
                },
                Some(duration) => tokio::select! {
                    settled = &mut receiver => match settled {
                        Ok(settled) => settled,
                        Err(_) => Err(PoolError::PoolTerminated),
                    },
                    _ = tokio::time::sleep(duration) => {
                        let _ = events.send(PoolEvent::Command(PoolCommand::Cancel {
                            task: task_id,
                            reason: CancelKind::Timeout,
                        }));
                        Err(PoolError::TimedOut)
                    }
                },
            }
        })
    }
}
