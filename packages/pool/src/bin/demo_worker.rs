// packages/pool/src/bin/demo_worker.rs
//! Demo process worker
//!
//! A stdio worker exposing a handful of methods, useful as a starting point
//! for worker binaries and as the process-transport test fixture. Diagnostics
//! go to stderr; stdout carries the protocol.

use anyhow::Result;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;
use workpool::{ErrorObject, MethodRegistry, RequestContext, Transfer, WorkerRuntime};

fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    registry.register("add", |_ctx, params: Vec<Value>| {
        let a = params
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| ErrorObject::new("TypeError", "add expects two integers"))?;
        let b = params
            .get(1)
            .and_then(Value::as_i64)
            .ok_or_else(|| ErrorObject::new("TypeError", "add expects two integers"))?;
        Ok(json!(a + b))
    });

    registry.register("echo", |_ctx, params: Vec<Value>| {
        Ok(params.into_iter().next().unwrap_or(Value::Null))
    });

    registry.register_async("sleep_ms", |_ctx, params: Vec<Value>| async move {
        let ms = params.first().and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    });

    registry.register("progress", |ctx: RequestContext, params: Vec<Value>| {
        let steps = params.first().and_then(Value::as_u64).unwrap_or(1);
        for step in 1..=steps {
            ctx.emit(json!(format!("progress: {}", step * 100 / steps)));
        }
        Ok(json!("done"))
    });

    registry.register("fail", |_ctx, params: Vec<Value>| -> Result<Value, ErrorObject> {
        let message = params
            .first()
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(ErrorObject::new("DemoError", message).with_field("demo", json!(true)))
    });

    registry.register("exit", |_ctx, params: Vec<Value>| -> Result<Value, ErrorObject> {
        let code = params.first().and_then(Value::as_i64).unwrap_or(1) as i32;
        std::process::exit(code)
    });

    registry.register("roundtrip", |ctx: RequestContext, params: Vec<Value>| {
        let message = params.into_iter().next().unwrap_or(Value::Null);
        Ok(Transfer::new(message, ctx.transferables.clone()))
    });

    registry
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("demo worker starting");
    WorkerRuntime::new(registry())
        .with_termination_handler(|| async {
            info!("demo worker terminating");
        })
        .run_stdio()
        .await?;
    Ok(())
}
