// tests/interchange_routing.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use interchange::engine::ShutdownHandle;
use interchange::errors::InterchangeError;
use interchange::exec::ExecutorRegistry;
use interchange::types::{FailureKind, Task, TaskResult, TaskStatus};
use interchange_test_utils::fake_executor::{FakeExecutor, registry_with};
use interchange_test_utils::harness::BrokerHarness;
use interchange_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn by_id(results: Vec<TaskResult>) -> BTreeMap<String, TaskResult> {
    results.into_iter().map(|r| (r.task_id.clone(), r)).collect()
}

#[tokio::test]
async fn payload_round_trips_through_executor() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-round");
    let (registry, tracker) = registry_with("default", FakeExecutor::doubling());
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    for i in 1..=3 {
        harness.send_task(&Task::new(format!("t{i}"), format!("p{i}"), "default"));
    }

    let (outcome, results) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let r = harness.results(3).await;
            handle.request();
            r
        })
    })
    .await;
    outcome?;

    let results = by_id(results);
    for i in 1..=3 {
        let r = &results[&format!("t{i}")];
        assert_eq!(r.status, TaskStatus::Success);
        assert_eq!(r.payload, format!("p{i}p{i}"));
    }
    assert_eq!(tracker.submitted_ids().len(), 3);

    Ok(())
}

/// `{id=1, label=default}` and `{id=2, label=missing}`.
#[tokio::test]
async fn unknown_label_fails_only_that_task() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-missing");
    let (registry, tracker) = registry_with("default", FakeExecutor::doubling());
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    harness.send_task(&Task::new("1", "P", "default"));
    harness.send_task(&Task::new("2", "P", "missing"));

    let (outcome, results) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let r = harness.results(2).await;
            handle.request();
            r
        })
    })
    .await;
    outcome?;

    let results = by_id(results);

    let ok = &results["1"];
    assert!(ok.is_success());
    assert_eq!(ok.payload, "PP");

    let failed = &results["2"];
    assert_eq!(failed.status, TaskStatus::Failure);
    let envelope = failed.envelope().expect("failure should carry an envelope");
    assert_eq!(envelope.kind, FailureKind::NoSuchExecutor);
    assert!(envelope.message.contains("missing"));

    assert_eq!(tracker.submitted_ids(), vec!["1".to_string()]);

    Ok(())
}

#[tokio::test]
async fn rejected_dispatch_becomes_failure_and_loop_continues() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-reject");
    let mut registry = ExecutorRegistry::new();
    registry.register("full", false, FakeExecutor::rejecting("queue is full").boxed())?;
    registry.register("ok", false, FakeExecutor::doubling().boxed())?;
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    harness.send_task(&Task::new("a", "1", "full"));
    harness.send_task(&Task::new("b", "2", "ok"));

    let (outcome, results) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let r = harness.results(2).await;
            handle.request();
            r
        })
    })
    .await;
    outcome?;

    let results = by_id(results);
    let envelope = results["a"].envelope().expect("envelope");
    assert_eq!(envelope.kind, FailureKind::DispatchRejected);
    assert!(envelope.message.contains("queue is full"));
    assert_eq!(results["b"].payload, "22");

    Ok(())
}

#[tokio::test]
async fn passthrough_controls_failure_payload() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-pass");
    let mut registry = ExecutorRegistry::new();
    registry.register("raw", true, FakeExecutor::failing("Traceback: boom").boxed())?;
    registry.register("safe", false, FakeExecutor::failing("Traceback: boom").boxed())?;
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    harness.send_task(&Task::new("r", "x", "raw"));
    harness.send_task(&Task::new("s", "x", "safe"));

    let (outcome, results) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let r = harness.results(2).await;
            handle.request();
            r
        })
    })
    .await;
    outcome?;

    let results = by_id(results);

    let raw = &results["r"];
    assert_eq!(raw.status, TaskStatus::Failure);
    assert_eq!(raw.payload, "Traceback: boom");
    assert!(raw.envelope().is_none());

    let safe = &results["s"];
    assert_eq!(safe.status, TaskStatus::Failure);
    assert!(!safe.payload.contains("Traceback"));
    let envelope = safe.envelope().expect("sanitized failure");
    assert_eq!(envelope.kind, FailureKind::ExecutionFailed);
    assert_eq!(envelope.message, "fake task failed");

    Ok(())
}

#[tokio::test]
async fn reconfigure_passthrough_is_validated() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-reconf");
    let (registry, _tracker) = registry_with("default", FakeExecutor::failing("raw detail"));
    let mut ic = harness.interchange(registry);

    let err = ic.reconfigure_passthrough("nope", true).unwrap_err();
    assert!(matches!(err, InterchangeError::NoSuchExecutor(label) if label == "nope"));

    ic.reconfigure_passthrough("default", true)?;
    assert!(ic.executors()[0].passthrough);

    let handle = ic.shutdown_handle();
    harness.send_task(&Task::new("t", "x", "default"));

    let (outcome, result) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let r = harness.next_result().await;
            handle.request();
            r
        })
    })
    .await;
    outcome?;

    assert_eq!(result.payload, "raw detail");

    Ok(())
}

#[tokio::test]
async fn drain_timeout_reports_abandoned_tasks() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-drain");
    let (registry, tracker) = registry_with("default", FakeExecutor::holding());
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    harness.send_task(&Task::new("b", "x", "default"));
    harness.send_task(&Task::new("a", "y", "default"));

    let (outcome, ()) = with_timeout(async {
        tokio::join!(ic.start(), async {
            while tracker.submitted().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle.request();
        })
    })
    .await;
    outcome?;

    let report = ic.last_quiesce_report().cloned().expect("report");
    assert_eq!(report.abandoned, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.drained, 0);
    assert_eq!(report.unpublished, 0);

    let results = by_id(harness.drain_published());
    assert_eq!(results.len(), 2);
    for r in results.values() {
        let envelope = r.envelope().expect("synthetic failure");
        assert_eq!(envelope.kind, FailureKind::DrainTimeout);
        assert!(envelope.message.contains("'default'"));
    }

    Ok(())
}

#[tokio::test]
async fn undispatched_tasks_are_answered_on_shutdown() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-pending");

    // The executor asks for shutdown while handling the first task, so the
    // rest of the prefetched batch is still undispatched.
    let slot: Arc<Mutex<Option<ShutdownHandle>>> = Arc::new(Mutex::new(None));
    let exec = {
        let slot = Arc::clone(&slot);
        FakeExecutor::new(move |payload| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.request();
            }
            Ok(payload.to_uppercase())
        })
    };
    let (registry, tracker) = registry_with("default", exec);
    let mut ic = harness.interchange(registry);
    *slot.lock().unwrap() = Some(ic.shutdown_handle());

    for id in ["t1", "t2", "t3"] {
        harness.send_task(&Task::new(id, "abc", "default"));
    }

    with_timeout(ic.start()).await?;

    let report = ic.last_quiesce_report().cloned().expect("report");
    assert_eq!(report.rejected_pending, vec!["t2".to_string(), "t3".to_string()]);
    assert_eq!(report.drained, 1);
    assert!(report.abandoned.is_empty());
    assert_eq!(tracker.submitted_ids(), vec!["t1".to_string()]);

    let results = by_id(harness.results(3).await);
    assert_eq!(results["t1"].payload, "ABC");
    for id in ["t2", "t3"] {
        let envelope = results[id].envelope().expect("shutdown failure");
        assert_eq!(envelope.kind, FailureKind::ShuttingDown);
    }

    Ok(())
}
