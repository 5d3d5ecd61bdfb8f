// packages/pool/src/lib.rs
//! workpool: a bounded worker pool for offloaded method invocation
//!
//! The pool offloads named method calls to a set of isolated executors and
//! multiplexes many concurrent callers over a bounded number of workers,
//! hiding the transport difference between OS processes and in-process
//! worker threads.
//!
//! # Architecture
//!
//! - **pool**: scheduler, worker handles, executor spawning, task handles
//! - **runtime**: the code running inside an executor (registry + RPC loop)
//! - **protocol**: wire messages, error records, the transfer envelope
//! - **utils**: errors and common helpers
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use std::sync::Arc;
//! use workpool::{MethodRegistry, Pool, PoolConfig};
//!
//! # async fn demo() -> workpool::Result<()> {
//! let mut registry = MethodRegistry::new();
//! registry.register("add", |_ctx, params| {
//!     Ok(json!(params[0].as_i64().unwrap() + params[1].as_i64().unwrap()))
//! });
//!
//! let pool = Pool::new(PoolConfig {
//!     registry: Some(Arc::new(registry)),
//!     ..Default::default()
//! })?;
//!
//! let out = pool.exec("add", vec![json!(2), json!(3)]).await?;
//! assert_eq!(out.value, json!(5));
//! pool.terminate(false, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod protocol;
pub mod runtime;
pub mod utils;

pub use pool::{
    EventCallback, ExecOptions, MinWorkers, Pool, PoolConfig, PoolStats, SpawnHook, SpawnOpts,
    TaskHandle, TerminateHook, WorkerKind, WorkerType,
};
pub use protocol::{
    ErrorObject, Reply, TaskOutput, Transfer, READY_SIGNAL, TERMINATE_SENTINEL,
};
pub use runtime::{MethodRegistry, RequestContext, WorkerRuntime};
pub use utils::errors::{PoolError, Result};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
