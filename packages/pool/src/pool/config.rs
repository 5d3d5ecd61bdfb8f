// packages/pool/src/pool/config.rs
//! Pool configuration and validation

use crate::pool::spawn::SpawnOpts;
use crate::runtime::MethodRegistry;
use crate::utils::errors::{PoolError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Executor flavor requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerType {
    /// Thread when a method registry is supplied, else process when a worker
    /// command is supplied.
    #[default]
    Auto,
    /// Browser-style workers; not satisfiable in this host.
    Web,
    /// Child process speaking the stdio protocol.
    Process,
    /// Dedicated in-process worker thread.
    Thread,
}

/// Executor flavor actually spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Process,
    Thread,
}

/// Lower bound on the pool size: a fixed count, or "as many as the maximum".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinWorkers {
    Fixed(usize),
    Max,
}

impl Default for MinWorkers {
    fn default() -> Self {
        MinWorkers::Fixed(0)
    }
}

/// Hook invoked immediately before spawning a worker; returning `Some`
/// overrides the spawn options for that worker (debug ports, per-worker env).
pub type SpawnHook = Arc<dyn Fn(&SpawnOpts) -> Option<SpawnOpts> + Send + Sync>;

/// Hook invoked after a worker has exited, for resource release.
pub type TerminateHook = Arc<dyn Fn(&SpawnOpts) + Send + Sync>;

/// Configuration for a worker pool.
#[derive(Clone)]
pub struct PoolConfig {
    /// Workers kept alive at rest (replenished after exits). Default 0.
    pub min_workers: MinWorkers,

    /// Hard cap on live workers. Default: available parallelism minus one
    /// (at least 1), or 3 when parallelism cannot be determined.
    pub max_workers: Option<usize>,

    /// Executor flavor. Default [`WorkerType::Auto`].
    pub worker_type: WorkerType,

    /// Grace window between the terminate sentinel and a forced kill.
    /// Default 1000 ms.
    pub worker_terminate_timeout: Duration,

    /// Program run as a process worker (resolved through `PATH` when bare).
    pub worker_command: Option<String>,

    /// Arguments passed to the worker program.
    pub worker_args: Vec<String>,

    /// Environment variables set on process workers.
    pub env_vars: Vec<(String, String)>,

    /// Working directory for process workers.
    pub work_dir: Option<PathBuf>,

    /// Methods served by thread workers.
    pub registry: Option<Arc<MethodRegistry>>,

    /// Per-worker spawn override hook.
    pub on_create_worker: Option<SpawnHook>,

    /// Post-exit resource release hook.
    pub on_terminate_worker: Option<TerminateHook>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: MinWorkers::default(),
            max_workers: None,
            worker_type: WorkerType::default(),
            worker_terminate_timeout: Duration::from_millis(1000),
            worker_command: None,
            worker_args: Vec::new(),
            env_vars: Vec::new(),
            work_dir: None,
            registry: None,
            on_create_worker: None,
            on_terminate_worker: None,
        }
    }
}

/// Validated configuration the scheduler runs on.
#[derive(Clone)]
pub(crate) struct ResolvedConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub kind: WorkerKind,
    pub terminate_timeout: Duration,
    pub registry: Option<Arc<MethodRegistry>>,
    pub spawn_template: SpawnOpts,
    pub on_create_worker: Option<SpawnHook>,
    pub on_terminate_worker: Option<TerminateHook>,
}

impl PoolConfig {
    pub(crate) fn validate(self) -> Result<ResolvedConfig> {
        let max_workers = match self.max_workers {
            Some(0) => {
                return Err(PoolError::Configuration(
                    "max_workers must be at least 1".into(),
                ))
            }
            Some(n) => n,
            None => default_max_workers(),
        };

        let min_workers = match self.min_workers {
            MinWorkers::Fixed(n) => n,
            MinWorkers::Max => max_workers,
        };
        if min_workers > max_workers {
            return Err(PoolError::Configuration(format!(
                "min_workers ({min_workers}) exceeds max_workers ({max_workers})"
            )));
        }

        let kind = match self.worker_type {
            WorkerType::Web => {
                return Err(PoolError::Configuration(
                    "web workers are not available in this host".into(),
                ))
            }
            WorkerType::Thread => {
                if self.registry.is_none() {
                    return Err(PoolError::Configuration(
                        "thread workers require a method registry".into(),
                    ));
                }
                WorkerKind::Thread
            }
            WorkerType::Process => {
                if self.worker_command.is_none() {
                    return Err(PoolError::Configuration(
                        "process workers require a worker command".into(),
                    ));
                }
                WorkerKind::Process
            }
            WorkerType::Auto => {
                if self.registry.is_some() {
                    WorkerKind::Thread
                } else if self.worker_command.is_some() {
                    WorkerKind::Process
                } else {
                    return Err(PoolError::Configuration(
                        "configure a method registry or a worker command".into(),
                    ));
                }
            }
        };

        let spawn_template = SpawnOpts {
            kind,
            command: self.worker_command,
            args: self.worker_args,
            env_vars: self.env_vars,
            work_dir: self.work_dir,
        };

        Ok(ResolvedConfig {
            min_workers,
            max_workers,
            kind,
            terminate_timeout: self.worker_terminate_timeout,
            registry: self.registry,
            spawn_template,
            on_create_worker: self.on_create_worker,
            on_terminate_worker: self.on_terminate_worker,
        })
    }
}

/// Default worker cap: leave one unit of parallelism for the pool itself.
fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_config() -> PoolConfig {
        PoolConfig {
            registry: Some(Arc::new(MethodRegistry::new())),
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_prefers_thread_when_registry_present() {
        let resolved = thread_config().validate().unwrap();
        assert_eq!(resolved.kind, WorkerKind::Thread);
    }

    #[test]
    fn test_auto_falls_back_to_process_with_command() {
        let config = PoolConfig {
            worker_command: Some("my-worker".into()),
            ..Default::default()
        };
        let resolved = config.validate().unwrap();
        assert_eq!(resolved.kind, WorkerKind::Process);
        assert_eq!(resolved.spawn_template.command.as_deref(), Some("my-worker"));
    }

    #[test]
    fn test_zero_max_workers_rejected() {
        let config = PoolConfig {
            max_workers: Some(0),
            ..thread_config()
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfig {
            min_workers: MinWorkers::Fixed(5),
            max_workers: Some(2),
            ..thread_config()
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_min_max_expands_to_max() {
        let config = PoolConfig {
            min_workers: MinWorkers::Max,
            max_workers: Some(4),
            ..thread_config()
        };
        let resolved = config.validate().unwrap();
        assert_eq!(resolved.min_workers, 4);
    }

    #[test]
    fn test_web_workers_unsupported() {
        let config = PoolConfig {
            worker_type: WorkerType::Web,
            ..thread_config()
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_auto_without_sources_rejected() {
        assert!(matches!(
            PoolConfig::default().validate(),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_cap_is_positive() {
        assert!(default_max_workers() >= 1);
    }
}
