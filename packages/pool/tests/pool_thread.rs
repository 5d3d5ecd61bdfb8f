//! Pool scenarios over the thread transport.

use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use workpool::{
    ErrorObject, ExecOptions, MethodRegistry, MinWorkers, Pool, PoolConfig, PoolError,
    RequestContext, Transfer,
};

fn demo_registry(log: Arc<Mutex<Vec<String>>>) -> Arc<MethodRegistry> {
    let mut registry = MethodRegistry::new();

    registry.register("add", |_ctx, params: Vec<Value>| {
        Ok(json!(
            params[0].as_i64().unwrap() + params[1].as_i64().unwrap()
        ))
    });

    let work_log = log.clone();
    registry.register_async("work", move |_ctx, params: Vec<Value>| {
        let work_log = work_log.clone();
        async move {
            let label = params[0].as_str().unwrap().to_string();
            let ms = params[1].as_u64().unwrap();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            work_log.lock().unwrap().push(label.clone());
            Ok(json!(label))
        }
    });

    registry.register("progress", |ctx: RequestContext, _params| {
        ctx.emit(json!("progress: 50"));
        Ok(json!("done"))
    });

    registry.register("reflect", |ctx: RequestContext, params: Vec<Value>| {
        let message = params.into_iter().next().unwrap_or(Value::Null);
        Ok(Transfer::new(message, ctx.transferables.clone()))
    });

    registry.register("oops", |_ctx, _params| -> Result<Value, ErrorObject> {
        Err(ErrorObject::new("DemoError", "requested failure"))
    });

    Arc::new(registry)
}

fn pool(min: usize, max: usize, log: Arc<Mutex<Vec<String>>>) -> Pool {
    Pool::new(PoolConfig {
        min_workers: MinWorkers::Fixed(min),
        max_workers: Some(max),
        registry: Some(demo_registry(log)),
        ..Default::default()
    })
    .unwrap()
}

async fn wait_for_total_workers(pool: &Pool, expected: usize) {
    for _ in 0..200 {
        if pool.stats().total_workers == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "pool never settled at {expected} workers, stats: {:?}",
        pool.stats()
    );
}

#[tokio::test]
async fn test_happy_path() {
    let pool = pool(0, 2, Arc::default());
    let out = pool.exec("add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(out.value, json!(5));
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_fifo_under_saturation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(0, 1, log.clone());

    let started = Instant::now();
    let a = pool.exec("work", vec![json!("a"), json!(50)]);
    let b = pool.exec("work", vec![json!("b"), json!(50)]);
    let c = pool.exec("work", vec![json!("c"), json!(50)]);

    assert_eq!(a.await.unwrap().value, json!("a"));
    assert_eq!(b.await.unwrap().value, json!("b"));
    assert_eq!(c.await.unwrap().value, json!("c"));

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(0, 1, log);

    let first = pool.exec("work", vec![json!("first"), json!(200)]);
    let second = pool.exec("add", vec![json!(1), json!(1)]);
    second.cancel();

    assert!(matches!(second.await, Err(PoolError::Cancelled)));
    assert_eq!(first.await.unwrap().value, json!("first"));
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_while_running_replaces_worker() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(1, 1, log);

    // Make sure the worker is up and the next task really goes in flight.
    pool.exec("add", vec![json!(0), json!(0)]).await.unwrap();

    let slow = pool.exec("work", vec![json!("slow"), json!(10_000)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    slow.cancel();
    assert!(matches!(slow.await, Err(PoolError::Cancelled)));

    // The pool heals back to min_workers and stays usable.
    wait_for_total_workers(&pool, 1).await;
    let out = pool.exec("add", vec![json!(4), json!(4)]).await.unwrap();
    assert_eq!(out.value, json!(8));
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_timeout_rejects_like_cancellation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(1, 1, log);
    pool.exec("add", vec![json!(0), json!(0)]).await.unwrap();

    let slow = pool
        .exec("work", vec![json!("slow"), json!(10_000)])
        .timeout(Duration::from_millis(50));
    assert!(matches!(slow.await, Err(PoolError::TimedOut)));

    wait_for_total_workers(&pool, 1).await;
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_leaves_worker_usable() {
    let pool = pool(0, 1, Arc::default());

    match pool.exec("nope", Vec::new()).await {
        Err(PoolError::UnknownMethod(name)) => assert_eq!(name, "nope"),
        other => panic!("expected UnknownMethod, got {other:?}"),
    }

    let out = pool.exec("add", vec![json!(2), json!(2)]).await.unwrap();
    assert_eq!(out.value, json!(4));
    assert_eq!(pool.stats().total_workers, 1);
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_user_error_surfaces_as_remote() {
    let pool = pool(0, 1, Arc::default());
    match pool.exec("oops", Vec::new()).await {
        Err(PoolError::Remote(err)) => {
            assert_eq!(err.name, "DemoError");
            assert_eq!(err.message, "requested failure");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_events_arrive_before_the_result() {
    let pool = pool(0, 1, Arc::default());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let options = ExecOptions {
        on_event: Some(Arc::new(move |event| {
            sink.lock().unwrap().push(event.value.clone());
        })),
        ..Default::default()
    };

    let out = pool
        .exec_with_options("progress", Vec::new(), options)
        .await
        .unwrap();
    assert_eq!(out.value, json!("done"));
    // The callback ran before the terminal resolution was delivered.
    assert_eq!(*events.lock().unwrap(), vec![json!("progress: 50")]);
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_transfer_buffers_move_through_the_thread_transport() {
    let pool = pool(0, 1, Arc::default());

    let options = ExecOptions {
        transferables: vec![Bytes::from_static(b"frame")],
        ..Default::default()
    };
    let out = pool
        .exec_with_options("reflect", vec![json!("payload")], options)
        .await
        .unwrap();
    assert_eq!(out.value, json!("payload"));
    assert_eq!(out.transferables, vec![Bytes::from_static(b"frame")]);
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_terminate_rejects_queued_tasks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(0, 1, log);

    let running = pool.exec("work", vec![json!("running"), json!(200)]);
    // Give the first task time to go in flight so the rest stay queued.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued: Vec<_> = (0..3)
        .map(|i| pool.exec("add", vec![json!(i), json!(i)]))
        .collect();

    pool.terminate(false, Some(Duration::from_secs(2)))
        .await
        .unwrap();

    for handle in queued {
        assert!(matches!(handle.await, Err(PoolError::PoolTerminated)));
    }
    // The in-flight task was allowed to finish inside the grace window.
    assert_eq!(running.await.unwrap().value, json!("running"));
    assert!(matches!(
        pool.exec("add", vec![json!(1), json!(1)]).await,
        Err(PoolError::PoolTerminated)
    ));
}

#[tokio::test]
async fn test_worker_cap_is_never_exceeded() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(0, 2, log);

    let handles: Vec<_> = (0..6)
        .map(|i| pool.exec("work", vec![json!(format!("t{i}")), json!(50)]))
        .collect();

    for _ in 0..20 {
        assert!(pool.stats().total_workers <= 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(pool.stats().total_workers <= 2);
    pool.terminate(true, None).await.unwrap();
}

#[tokio::test]
async fn test_stats_reflect_idle_and_busy_workers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pool = pool(2, 2, log);
    wait_for_total_workers(&pool, 2).await;

    let slow = pool.exec("work", vec![json!("slow"), json!(300)]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = pool.stats();
    assert_eq!(stats.total_workers, 2);
    assert_eq!(stats.busy_workers, 1);
    assert_eq!(stats.idle_workers, 1);
    assert_eq!(stats.pending_tasks, 0);

    slow.await.unwrap();
    pool.terminate(true, None).await.unwrap();
}
