// packages/pool/src/runtime/serve.rs
//! Worker-side RPC loop
//!
//! The runtime serves one request at a time: look the method up, invoke it,
//! send exactly one terminal response, repeat. Two endpoints share the loop:
//!
//! - **stdio** for process workers: newline-delimited JSON on stdin/stdout.
//!   The terminate sentinel runs the termination handler and exits 0; a
//!   closed stdin means the parent is gone and the process exits 1.
//! - **channels** for thread workers: the typed messages pass through
//!   unbounded channels without serialization.
//!
//! After registration completes the runtime announces itself with the ready
//! signal; the pool treats that as eligibility for dispatch.

use crate::protocol::{ErrorObject, ParentMessage, Request, Response, WorkerMessage};
use crate::runtime::registry::{MethodRegistry, RequestContext};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Callback invoked once before the worker exits; may be asynchronous to
/// delay the exit until cleanup completes.
pub type TerminationHandler =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The code running inside an executor: a method registry plus the RPC loop.
pub struct WorkerRuntime {
    registry: MethodRegistry,
    termination_handler: Option<TerminationHandler>,
}

impl WorkerRuntime {
    pub fn new(registry: MethodRegistry) -> Self {
        Self {
            registry,
            termination_handler: None,
        }
    }

    /// Install a handler that runs before the worker exits on a terminate
    /// request.
    pub fn with_termination_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.termination_handler = Some(Box::new(move || Box::pin(f())));
        self
    }

    /// Serve the RPC loop over stdin/stdout. Never returns during normal
    /// operation: the terminate sentinel exits the process with code 0 and a
    /// disconnected parent exits with code 1.
    ///
    /// Worker methods must not write to stdout; it carries the protocol.
    /// Diagnostics belong on stderr (`tracing` with a stderr subscriber).
    pub async fn run_stdio(mut self) -> std::io::Result<()> {
        self.seed_builtins();

        let (tx_out, mut rx_out) = tokio::sync::mpsc::unbounded_channel::<WorkerMessage>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(msg) = rx_out.recv().await {
                match msg.to_json() {
                    Ok(line) => {
                        if stdout.write_all(line.as_bytes()).await.is_err()
                            || stdout.write_all(b"\n").await.is_err()
                            || stdout.flush().await.is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "failed to encode outbound message"),
                }
            }
        });

        let _ = tx_out.send(WorkerMessage::Ready);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ParentMessage::from_json(line) {
                Err(err) => warn!(%err, "dropping malformed message"),
                Ok(ParentMessage::Terminate) => {
                    debug!("terminate sentinel received");
                    self.run_termination_handler().await;
                    drop(tx_out);
                    let _ = writer.await;
                    std::process::exit(0);
                }
                Ok(ParentMessage::Request(req)) => {
                    self.handle_request(req, &tx_out).await;
                }
            }
        }

        debug!("stdin closed, parent is gone");
        drop(tx_out);
        let _ = writer.await;
        std::process::exit(1);
    }

    /// Serve the RPC loop over in-process channels (thread workers). Returns
    /// when the terminate sentinel arrives or the pool side closes the
    /// channel.
    pub(crate) async fn run_channel(
        mut self,
        mut inbound: UnboundedReceiver<ParentMessage>,
        outbound: UnboundedSender<WorkerMessage>,
    ) {
        self.seed_builtins();
        let _ = outbound.send(WorkerMessage::Ready);

        while let Some(msg) = inbound.recv().await {
            match msg {
                ParentMessage::Terminate => {
                    debug!("terminate sentinel received");
                    self.run_termination_handler().await;
                    break;
                }
                ParentMessage::Request(req) => {
                    self.handle_request(req, &outbound).await;
                }
            }
        }
    }

    /// Built-ins available on every worker. `methods` reports the key list
    /// of the registry, itself included.
    fn seed_builtins(&mut self) {
        let mut names = self.registry.method_names();
        names.push("methods".to_string());
        names.sort();
        names.dedup();
        self.registry.register("methods", move |_ctx, _params| {
            Ok::<Value, ErrorObject>(Value::from(names.clone()))
        });
    }

    async fn handle_request(&self, req: Request, out: &UnboundedSender<WorkerMessage>) {
        let Request {
            id,
            method,
            params,
            transferables,
        } = req;

        let Some(handler) = self.registry.get(&method) else {
            let _ = out.send(WorkerMessage::Response(Response::failure(
                id,
                ErrorObject::unknown_method(&method),
            )));
            return;
        };

        let ctx = RequestContext::new(id, transferables, out.clone());
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, params))) {
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(panic_error(&method, payload)),
            },
            Err(payload) => Err(panic_error(&method, payload)),
        };

        let response = match outcome {
            Ok(reply) => {
                let (value, transferables) = reply.into_parts();
                Response::success(id, value, transferables)
            }
            Err(error) => Response::failure(id, error),
        };
        let _ = out.send(WorkerMessage::Response(response));
    }

    async fn run_termination_handler(&mut self) {
        if let Some(handler) = self.termination_handler.take() {
            handler().await;
        }
    }
}

fn panic_error(method: &str, payload: Box<dyn std::any::Any + Send>) -> ErrorObject {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("method \"{method}\" panicked")
    };
    ErrorObject::new("PanicError", message)
}
