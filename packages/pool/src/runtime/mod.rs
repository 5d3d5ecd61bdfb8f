// packages/pool/src/runtime/mod.rs
//! Worker-side runtime
//!
//! The code that runs *inside* an executor:
//!
//! - **Registry**: string-keyed table of user methods (sync or async)
//! - **Serve loop**: receives requests, invokes handlers, routes results and
//!   errors back, relays mid-task events
//!
//! Process workers call [`WorkerRuntime::run_stdio`] from their own binary;
//! thread workers are driven by the pool through the channel endpoint.

pub mod registry;
pub mod serve;

pub use registry::{MethodFn, MethodFuture, MethodRegistry, RequestContext};
pub use serve::{TerminationHandler, WorkerRuntime};
