// packages/pool/src/runtime/registry.rs
//! Method registry for worker runtimes
//!
//! Dispatch is a string-keyed table mapping method names to handlers. A
//! handler has a single capability: invoke with params, yield either a
//! synchronous value or a completing asynchronous value. Both shapes are
//! stored uniformly as functions returning a boxed future.

use crate::protocol::{Event, Reply, WorkerMessage};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::protocol::ErrorObject;

/// Boxed future yielded by a method handler.
pub type MethodFuture = Pin<Box<dyn Future<Output = std::result::Result<Reply, ErrorObject>> + Send>>;

/// A registered handler.
pub type MethodFn = Arc<dyn Fn(RequestContext, Vec<Value>) -> MethodFuture + Send + Sync>;

/// Per-request context handed to every handler invocation.
///
/// The request id is bound here, per call, so event emission stays
/// unambiguous even if the serve loop ever pipelines requests.
pub struct RequestContext {
    pub request_id: u64,
    /// Buffers that accompanied the request.
    pub transferables: Vec<Bytes>,
    events: UnboundedSender<WorkerMessage>,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: u64,
        transferables: Vec<Bytes>,
        events: UnboundedSender<WorkerMessage>,
    ) -> Self {
        Self {
            request_id,
            transferables,
            events,
        }
    }

    /// Emit a mid-task event tied to the current request.
    ///
    /// Delivery is best-effort: when the pool side is gone the event is
    /// dropped silently.
    pub fn emit(&self, payload: impl Into<Reply>) {
        let (value, transferables) = payload.into().into_parts();
        let _ = self.events.send(WorkerMessage::Event(Event::new(
            self.request_id,
            value,
            transferables,
        )));
    }
}

/// String-keyed table of user methods served by a worker.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodFn>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous method.
    pub fn register<R, F>(&mut self, name: impl Into<String>, f: F)
    where
        R: Into<Reply>,
        F: Fn(RequestContext, Vec<Value>) -> std::result::Result<R, ErrorObject>
            + Send
            + Sync
            + 'static,
    {
        let func: MethodFn = Arc::new(move |ctx, params| -> MethodFuture {
            let out = f(ctx, params).map(Into::into);
            Box::pin(std::future::ready(out))
        });
        self.methods.insert(name.into(), func);
    }

    /// Register an asynchronous method.
    pub fn register_async<R, F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        R: Into<Reply>,
        F: Fn(RequestContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ErrorObject>> + Send + 'static,
    {
        let func: MethodFn = Arc::new(move |ctx, params| -> MethodFuture {
            let fut = f(ctx, params);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        self.methods.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<MethodFn> {
        let found = self.methods.get(name).cloned();
        trace!(method = name, found = found.is_some(), "method lookup");
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Names of all registered methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
