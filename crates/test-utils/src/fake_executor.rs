use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use interchange::errors::{InterchangeError, Result};
use interchange::exec::{BackendFailure, ExecutorBackend, ExecutorRegistry, ResultSink};
use interchange::types::{EndpointIdentity, Task};

type Compute = dyn Fn(&str) -> std::result::Result<String, BackendFailure> + Send + Sync;

#[derive(Clone)]
enum Mode {
    /// Answer every task immediately with `f(payload)`.
    Compute(Arc<Compute>),
    /// Accept tasks and never answer them.
    Hold,
    /// Refuse every task at submit time.
    Reject(String),
}

/// Shared view of what a [`FakeExecutor`] saw, usable after the executor
/// itself has been boxed into a registry.
#[derive(Clone, Default)]
pub struct FakeExecutorTracker {
    submitted: Arc<Mutex<Vec<Task>>>,
    shutdowns: Arc<AtomicUsize>,
    bound_to: Arc<Mutex<Option<String>>>,
}

impl FakeExecutorTracker {
    pub fn submitted(&self) -> Vec<Task> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted().into_iter().map(|t| t.task_id).collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn bound_to(&self) -> Option<String> {
        self.bound_to.lock().unwrap().clone()
    }
}

/// An in-process executor backend that:
/// - records which tasks were submitted
/// - answers them deterministically (or holds / rejects them, per mode).
pub struct FakeExecutor {
    mode: Mode,
    tracker: FakeExecutorTracker,
    endpoint_id: Option<String>,
    sink: Option<ResultSink>,
}

impl FakeExecutor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<String, BackendFailure> + Send + Sync + 'static,
    {
        Self::with_mode(Mode::Compute(Arc::new(f)))
    }

    /// `f(P) = P + P`.
    pub fn doubling() -> Self {
        Self::new(|payload| Ok(format!("{payload}{payload}")))
    }

    /// Fails every task with the given raw error text.
    pub fn failing(raw: &str) -> Self {
        let raw = raw.to_string();
        Self::new(move |_| {
            Err(BackendFailure {
                summary: "fake task failed".to_string(),
                raw: raw.clone(),
            })
        })
    }

    pub fn holding() -> Self {
        Self::with_mode(Mode::Hold)
    }

    pub fn rejecting(message: &str) -> Self {
        Self::with_mode(Mode::Reject(message.to_string()))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            tracker: FakeExecutorTracker::default(),
            endpoint_id: None,
            sink: None,
        }
    }

    pub fn tracker(&self) -> FakeExecutorTracker {
        self.tracker.clone()
    }

    pub fn boxed(self) -> Box<dyn ExecutorBackend> {
        Box::new(self)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn kind(&self) -> &'static str {
        "fake"
    }

    fn bind(&mut self, identity: &EndpointIdentity, sink: ResultSink) -> Result<()> {
        self.endpoint_id = Some(identity.endpoint_id.clone());
        *self.tracker.bound_to.lock().unwrap() = Some(identity.endpoint_id.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn endpoint_id(&self) -> Option<&str> {
        self.endpoint_id.as_deref()
    }

    fn submit(&mut self, task: Task) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let label = self
                .sink
                .as_ref()
                .map(|s| s.label().to_string())
                .unwrap_or_default();

            match &self.mode {
                Mode::Reject(message) => {
                    return Err(InterchangeError::Dispatch {
                        label,
                        message: message.clone(),
                    });
                }
                Mode::Hold => {}
                Mode::Compute(f) => {
                    let outcome = f(&task.function_payload);
                    if let Some(sink) = &self.sink {
                        sink.send(task.task_id.clone(), outcome);
                    }
                }
            }

            self.tracker.submitted.lock().unwrap().push(task);
            Ok(())
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.tracker.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.sink = None;
        })
    }
}

/// A registry holding one fake executor under `label`.
pub fn registry_with(label: &str, exec: FakeExecutor) -> (ExecutorRegistry, FakeExecutorTracker) {
    let tracker = exec.tracker();
    let mut registry = ExecutorRegistry::new();
    registry
        .register(label, false, exec.boxed())
        .expect("fake executor should register");
    (registry, tracker)
}
