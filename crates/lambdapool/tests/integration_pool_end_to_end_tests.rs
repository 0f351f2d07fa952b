mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lambdapool::{
    CallArgs, CallState, ConnectionContext, FailureKind, FunctionPath, InvokeError, Invoker,
    TransportError,
};
use serde_json::{json, Value};

use support::{context, harness, harness_with_context, CountingConnector, test_agent};

#[test]
fn echo_round_trips_through_the_pool() {
    let harness = harness(2);
    assert_eq!(
        harness.pool.apply("echo.echo", CallArgs::new().arg("hi")),
        Ok(json!("ECHOING: hi"))
    );
    assert_eq!(
        harness
            .pool
            .apply("echo.echo", CallArgs::new().kwarg("msg", "by name")),
        Ok(json!("ECHOING: by name"))
    );
}

#[test]
fn map_preserves_input_order() {
    let harness = harness(4);
    assert_eq!(
        harness.pool.map("algorithms.fib", 0..2u64),
        Ok(vec![json!(0), json!(1)])
    );

    let mapped = harness
        .pool
        .map("algorithms.fib", 0..20u64)
        .expect("map should succeed");
    let applied: Vec<Value> = (0..20u64)
        .map(|n| {
            harness
                .pool
                .apply("algorithms.fib", CallArgs::new().arg(n))
                .expect("apply should succeed")
        })
        .collect();
    assert_eq!(mapped, applied);
    assert_eq!(mapped[10], json!(55));
}

#[test]
fn map_fails_with_the_remote_message() {
    let harness = harness(2);
    assert_eq!(
        harness.pool.map("algorithms.fib", [1u64, 51, 2]),
        Err(InvokeError::application(
            "fibonacci is only supported for n <= 50, got 51"
        ))
    );
}

#[test]
fn map_stops_starting_inputs_after_a_failure() {
    let harness = harness(2);
    assert_eq!(
        harness.pool.map("testing.reject_first", 0..200u64),
        Err(InvokeError::application("first input rejected"))
    );

    let executed = harness.executed.load(Ordering::SeqCst);
    assert!(executed >= 1);
    assert!(executed < 50, "{executed} of 200 inputs ran after the failure");
}

#[test]
fn starmap_passes_keyword_arguments() {
    let harness = harness(2);
    let calls = vec![
        CallArgs::new().kwarg("msg", "a"),
        CallArgs::new().arg("b"),
    ];
    assert_eq!(
        harness.pool.starmap("echo.echo", calls),
        Ok(vec![json!("ECHOING: a"), json!("ECHOING: b")])
    );
}

#[test]
fn apply_async_resolves_later() {
    let harness = harness(2);
    let slow = harness
        .pool
        .apply_async("testing.sleep", CallArgs::new().arg(100));
    assert!(!slow.ready());
    assert!(matches!(
        slow.state(),
        CallState::Pending | CallState::Dispatched
    ));

    assert_eq!(slow.get(), Ok(json!(100)));
    assert!(slow.ready());
    assert_eq!(slow.state(), CallState::Succeeded);
}

#[test]
fn apply_async_defers_remote_errors_until_get() {
    let harness = harness(1);
    let handle = harness.pool.apply_async("testing.fail", CallArgs::new());
    assert_eq!(handle.get(), Err(InvokeError::application("bad input")));
    assert_eq!(handle.state(), CallState::Failed(FailureKind::Application));
}

#[test]
fn concurrency_never_exceeds_worker_count() {
    let harness = harness(3);
    let mapped = harness
        .pool
        .map("testing.measured", 0..24u64)
        .expect("map should succeed");
    assert_eq!(mapped.len(), 24);

    let handles: Vec<_> = (0..24u64)
        .map(|n| {
            harness
                .pool
                .apply_async("testing.measured", CallArgs::new().arg(n))
        })
        .collect();
    for (n, handle) in handles.iter().enumerate() {
        assert_eq!(handle.get(), Ok(json!(n)));
    }

    assert!(harness.gauge.peak() >= 1);
    assert!(
        harness.gauge.peak() <= 3,
        "peak concurrency was {}",
        harness.gauge.peak()
    );
}

#[test]
fn each_worker_opens_at_most_one_connection() {
    let harness = harness(3);
    harness
        .pool
        .map("algorithms.fib", 0..30u64)
        .expect("map should succeed");
    for n in 0..10u64 {
        harness
            .pool
            .apply("algorithms.fib", CallArgs::new().arg(n))
            .expect("apply should succeed");
    }
    assert!(harness.connector.connects() >= 1);
    assert!(harness.connector.connects() <= 3);
}

#[test]
fn calls_from_another_rayon_pool_use_their_own_connections() {
    let harness = harness(2);
    harness
        .pool
        .map("algorithms.fib", 0..8u64)
        .expect("map should succeed");

    let invoker = harness
        .pool
        .invoker("algorithms.fib")
        .expect("path should parse");
    let foreign = rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .expect("foreign pool should start");
    let results = foreign.broadcast(|_| invoker.invoke(CallArgs::new().arg(5)));
    assert_eq!(results, vec![Ok(json!(5)), Ok(json!(5))]);

    let per_connection = harness.connector.threads_per_connection();
    assert!(per_connection.iter().all(|threads| *threads == 1), "{per_connection:?}");
    assert!(harness.connector.connects() >= 3);
    assert!(harness.connector.connects() <= 4);
}

#[test]
fn standalone_invoker_opens_one_connection_per_thread() {
    let connector = Arc::new(CountingConnector::new(test_agent(
        Arc::default(),
        Arc::default(),
    )));
    let invoker = Invoker::new(
        Arc::new(context()),
        FunctionPath::parse("echo.echo").expect("path should parse"),
        connector.clone(),
    );

    thread::scope(|scope| {
        for _ in 0..4 {
            let invoker = invoker.clone();
            scope.spawn(move || {
                for _ in 0..3 {
                    assert_eq!(
                        invoker.invoke(CallArgs::new().arg("hi")),
                        Ok(json!("ECHOING: hi"))
                    );
                }
            });
        }
    });

    assert_eq!(connector.connects(), 4);
    assert_eq!(connector.threads_per_connection(), vec![1, 1, 1, 1]);
}

#[test]
fn slow_call_times_out_as_transport_error() {
    let context = ConnectionContext::builder("test-function")
        .read_timeout(Duration::from_millis(50))
        .build()
        .expect("context should build");
    let harness = harness_with_context(1, context);

    let outcome = harness
        .pool
        .apply("testing.sleep", CallArgs::new().arg(500));
    assert_eq!(
        outcome,
        Err(InvokeError::Transport(TransportError::Timeout(
            Duration::from_millis(50)
        )))
    );
    assert_eq!(
        outcome.expect_err("call should time out").kind(),
        Some(FailureKind::Transport)
    );
}

#[test]
fn unknown_functions_fail_as_application_errors() {
    let harness = harness(1);
    assert_eq!(
        harness.pool.apply("algorithms.nope", CallArgs::new()),
        Err(InvokeError::application(
            "module 'algorithms' has no function 'nope'"
        ))
    );
    assert_eq!(
        harness.pool.apply("nothing.here", CallArgs::new()),
        Err(InvokeError::application("no module named 'nothing'"))
    );
}

#[test]
fn remote_panic_is_reported_not_propagated() {
    let harness = harness(1);
    assert_eq!(
        harness.pool.apply("testing.explode", CallArgs::new()),
        Err(InvokeError::application("exploded on purpose"))
    );
    assert_eq!(
        harness.pool.apply("algorithms.fib", CallArgs::new().arg(3)),
        Ok(json!(2))
    );
}

#[test]
fn shutdown_waits_for_queued_calls() {
    let harness = harness(1);
    let first = harness
        .pool
        .apply_async("testing.sleep", CallArgs::new().arg(60));
    let second = harness
        .pool
        .apply_async("testing.sleep", CallArgs::new().arg(60));
    assert!(harness.pool.in_flight() >= 1);

    harness.pool.shutdown();
    assert!(first.ready());
    assert!(second.ready());
    assert_eq!(second.get(), Ok(json!(60)));
}

#[test]
fn invokers_from_one_pool_share_response_shape() {
    let harness = harness(2);
    let fib = harness
        .pool
        .invoker("algorithms.fib")
        .expect("path should parse");
    let again = harness
        .pool
        .invoker("algorithms.fib")
        .expect("path should parse");

    for n in [7u64, 51] {
        let a = fib.call_response(CallArgs::new().arg(n));
        let b = again.call_response(CallArgs::new().arg(n));
        assert_eq!(a, b);
    }
}
