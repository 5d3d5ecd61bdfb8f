// packages/pool/src/pool/mod.rs
//! Parent-side worker pool
//!
//! This module provides the caller-facing half of the system:
//!
//! - **Scheduler**: FIFO task queue, bounded worker set, crash replacement
//! - **Worker handle**: request/reply correlation for one executor
//! - **Spawn**: process and thread executor transports
//! - **Task handle**: cancellable, timeout-capable settlement for the caller
//!
//! # Architecture
//!
//! ```text
//! caller ──exec──▶ Pool ──▶ queue ──▶ scheduler ──▶ WorkerHandle ──▶ executor
//!    ▲                                    │
//!    └──────── TaskHandle ◀── resolver ◀──┘
//! ```

pub mod config;
pub mod handle;
pub mod scheduler;
pub mod spawn;
pub(crate) mod worker_handle;

pub use config::{MinWorkers, PoolConfig, SpawnHook, TerminateHook, WorkerKind, WorkerType};
pub use handle::TaskHandle;
pub use scheduler::{EventCallback, ExecOptions, Pool, PoolStats};
pub use spawn::SpawnOpts;
