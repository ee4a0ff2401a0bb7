// tests/interchange_backpressure.rs

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture};

use interchange::channel::{Broker, MemoryBroker, ResultChannel, TaskChannel};
use interchange::engine::{Interchange, LifecycleState};
use interchange::errors::ChannelError;
use interchange::exec::ExecutorRegistry;
use interchange::registration::RegistrationClient;
use interchange::types::{ChannelDescriptor, FailureKind, Task, TaskResult, TaskStatus};
use interchange_test_utils::builders::fast_settings;
use interchange_test_utils::fake_executor::{FakeExecutor, registry_with};
use interchange_test_utils::harness::BrokerHarness;
use interchange_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// One worker running a process that outlives every test here.
#[cfg(unix)]
fn sleeping_executor() -> Box<interchange::exec::ProcessExecutor> {
    use interchange::exec::{ProcessExecutor, ProcessExecutorOptions};

    Box::new(ProcessExecutor::new(ProcessExecutorOptions {
        cmd: "exec sleep 20".to_string(),
        max_workers: 1,
        task_timeout: None,
    }))
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_is_bounded_while_executor_is_saturated() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-saturated");
    let mut registry = ExecutorRegistry::new();
    registry.register("slow", false, sleeping_executor())?;
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    for i in 0..10 {
        harness.send_task(&Task::new(format!("s{i}"), "", "slow"));
    }

    let started = Instant::now();
    let (outcome, ()) = with_timeout(async {
        tokio::join!(ic.start(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.request();
        })
    })
    .await;
    outcome?;

    // 500ms of running plus a 300ms drain; well short of one task.
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "shutdown took {:?}",
        started.elapsed()
    );
    assert_eq!(ic.state(), LifecycleState::Stopped);

    let report = ic.last_quiesce_report().cloned().expect("report");
    let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    assert_eq!(report.abandoned, expected);
    assert_eq!(report.drained, 0);
    assert!(report.rejected_pending.is_empty());

    let results = harness.drain_published();
    assert_eq!(results.len(), 10);
    for r in &results {
        let envelope = r.envelope().expect("synthetic failure");
        assert_eq!(envelope.kind, FailureKind::DrainTimeout);
    }

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn results_are_published_while_another_executor_is_saturated() -> TestResult {
    init_tracing();

    let mut harness = BrokerHarness::new("ep-interleave");
    let mut registry = ExecutorRegistry::new();
    registry.register("slow", false, sleeping_executor())?;
    registry.register("fast", false, FakeExecutor::doubling().boxed())?;
    let mut ic = harness.interchange(registry);
    let handle = ic.shutdown_handle();

    for i in 0..6 {
        harness.send_task(&Task::new(format!("s{i}"), "", "slow"));
    }
    harness.send_task(&Task::new("f", "ab", "fast"));

    let (outcome, fast) = with_timeout(async {
        tokio::join!(ic.start(), async {
            let fast = harness.next_result().await;
            handle.request();
            fast
        })
    })
    .await;
    outcome?;

    assert_eq!(fast.task_id, "f");
    assert_eq!(fast.status, TaskStatus::Success);
    assert_eq!(fast.payload, "abab");

    let report = ic.last_quiesce_report().cloned().expect("report");
    assert_eq!(report.abandoned.len(), 6);

    Ok(())
}

/// Tasks come from the in-memory broker; results go nowhere, ever.
struct StuckResultsBroker {
    tasks: MemoryBroker,
}

impl Broker for StuckResultsBroker {
    fn open_task_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn TaskChannel>, ChannelError>> {
        self.tasks.open_task_channel(descriptor, endpoint_id)
    }

    fn open_result_channel<'a>(
        &'a self,
        _descriptor: &'a ChannelDescriptor,
        _endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ResultChannel>, ChannelError>> {
        Box::pin(async { Ok(Box::new(StuckResults) as Box<dyn ResultChannel>) })
    }
}

struct StuckResults;

impl ResultChannel for StuckResults {
    fn publish<'a>(
        &'a mut self,
        _result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(future::pending())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(future::pending())
    }
}

#[tokio::test]
async fn quiesce_does_not_wait_forever_on_a_stuck_result_channel() -> TestResult {
    init_tracing();

    let harness = BrokerHarness::new("ep-stuck");
    let (registry, tracker) = registry_with("default", FakeExecutor::holding());
    let mut ic = Interchange::new(
        harness.identity(),
        fast_settings(),
        registry,
        Some(harness.info.clone()),
        RegistrationClient::disabled(),
        Arc::new(StuckResultsBroker {
            tasks: harness.broker.clone(),
        }),
    )?;
    let handle = ic.shutdown_handle();

    harness.send_task(&Task::new("a", "x", "default"));
    harness.send_task(&Task::new("b", "y", "default"));

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

    assert_eq!(ic.state(), LifecycleState::Stopped);
    let report = ic.last_quiesce_report().cloned().expect("report");
    assert_eq!(report.abandoned, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.unpublished, 2);

    Ok(())
}
