// src/exec/registry.rs

//! Label-keyed set of executor backends.
//!
//! The registry is populated once, bound to the endpoint identity, and then
//! used read-only: `dispatch` routes a task to the backend named by its
//! label, and `next_result` yields results from all backends merged in
//! arrival order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ExecutorType};
use crate::errors::{InterchangeError, Result};
use crate::exec::backend::{
    BackendOutput, ExecutorBackend, ProcessExecutor, ProcessExecutorOptions, ResultSink,
};
use crate::types::{EndpointIdentity, FailureEnvelope, FailureKind, Task, TaskId, TaskResult};

struct ExecutorHandle {
    passthrough: bool,
    backend: Box<dyn ExecutorBackend>,
}

/// Read-only view of one configured executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorInfo {
    pub label: String,
    pub kind: &'static str,
    pub passthrough: bool,
    pub endpoint_id: Option<String>,
}

pub struct ExecutorRegistry {
    handles: BTreeMap<String, ExecutorHandle>,
    results_tx: mpsc::UnboundedSender<BackendOutput>,
    results_rx: mpsc::UnboundedReceiver<BackendOutput>,
    /// task id -> executor label, for tasks dispatched but not yet answered.
    in_flight: HashMap<TaskId, String>,
    bound_to: Option<String>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("labels", &self.handles.keys().collect::<Vec<_>>())
            .field("in_flight", &self.in_flight.len())
            .field("bound_to", &self.bound_to)
            .finish()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            handles: BTreeMap::new(),
            results_tx,
            results_rx,
            in_flight: HashMap::new(),
            bound_to: None,
        }
    }

    /// Construct the backends described by a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();

        for (label, exec) in cfg.executors() {
            let backend: Box<dyn ExecutorBackend> = match exec.executor_type {
                ExecutorType::Process => Box::new(ProcessExecutor::new(ProcessExecutorOptions {
                    cmd: exec.cmd.clone().unwrap_or_default(),
                    max_workers: exec.max_workers,
                    task_timeout: exec.task_timeout_secs.map(Duration::from_secs),
                })),
            };
            registry.register(label.clone(), exec.passthrough, backend)?;
        }

        Ok(registry)
    }

    /// Add a backend under `label`. Only allowed before [`bind_all`](Self::bind_all).
    pub fn register(
        &mut self,
        label: impl Into<String>,
        passthrough: bool,
        backend: Box<dyn ExecutorBackend>,
    ) -> Result<()> {
        let label = label.into();

        if self.bound_to.is_some() {
            return Err(InterchangeError::ConfigError(format!(
                "cannot add executor '{label}' after the registry was bound"
            )));
        }
        if label.trim().is_empty() {
            return Err(InterchangeError::ConfigError(
                "executor label must not be empty".to_string(),
            ));
        }
        if self.handles.contains_key(&label) {
            return Err(InterchangeError::ConfigError(format!(
                "duplicate executor label '{label}'"
            )));
        }

        self.handles.insert(
            label,
            ExecutorHandle {
                passthrough,
                backend,
            },
        );
        Ok(())
    }

    /// Bind every backend to `identity` and check that each one reports the
    /// same endpoint id afterwards.
    pub fn bind_all(&mut self, identity: &EndpointIdentity) -> Result<()> {
        if let Some(bound) = &self.bound_to {
            return Err(InterchangeError::ConfigError(format!(
                "executor registry already bound to endpoint '{bound}'"
            )));
        }

        for (label, handle) in self.handles.iter_mut() {
            let sink = ResultSink::new(label.clone(), self.results_tx.clone());
            handle.backend.bind(identity, sink)?;

            match handle.backend.endpoint_id() {
                Some(id) if id == identity.endpoint_id => {
                    debug!(label = %label, kind = handle.backend.kind(), "executor bound");
                }
                other => {
                    return Err(InterchangeError::ConfigError(format!(
                        "executor '{label}' reports endpoint {other:?} after binding to '{}'",
                        identity.endpoint_id
                    )));
                }
            }
        }

        self.bound_to = Some(identity.endpoint_id.clone());
        info!(
            endpoint_id = %identity.endpoint_id,
            executors = ?self.handles.keys().collect::<Vec<_>>(),
            "executors bound"
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(|s| s.as_str())
    }

    pub fn executors(&self) -> impl Iterator<Item = ExecutorInfo> + '_ {
        self.handles.iter().map(|(label, handle)| ExecutorInfo {
            label: label.clone(),
            kind: handle.backend.kind(),
            passthrough: handle.passthrough,
            endpoint_id: handle.backend.endpoint_id().map(str::to_string),
        })
    }

    pub fn passthrough(&self, label: &str) -> Option<bool> {
        self.handles.get(label).map(|h| h.passthrough)
    }

    /// The one sanctioned way to change an executor's passthrough flag.
    pub fn reconfigure_passthrough(&mut self, label: &str, passthrough: bool) -> Result<()> {
        let handle = self
            .handles
            .get_mut(label)
            .ok_or_else(|| InterchangeError::NoSuchExecutor(label.to_string()))?;

        if handle.passthrough != passthrough {
            info!(label, passthrough, "executor passthrough reconfigured");
            handle.passthrough = passthrough;
        }
        Ok(())
    }

    /// Route `task` to its executor. Returns once the backend accepted it.
    pub async fn dispatch(&mut self, task: Task) -> Result<()> {
        let label = task.target_executor_label.clone();
        let handle = self
            .handles
            .get_mut(&label)
            .ok_or_else(|| InterchangeError::NoSuchExecutor(label.clone()))?;

        let task_id = task.task_id.clone();
        handle.backend.submit(task).await?;

        debug!(task_id = %task_id, label = %label, "task dispatched");
        self.in_flight.insert(task_id, label);
        Ok(())
    }

    /// Next result from any backend. Pending forever while nothing arrives.
    /// Cancel-safe.
    pub async fn next_result(&mut self) -> TaskResult {
        match self.results_rx.recv().await {
            Some(output) => self.finish(output),
            // The registry holds a sender, so the stream never ends.
            None => std::future::pending().await,
        }
    }

    fn finish(&mut self, output: BackendOutput) -> TaskResult {
        if self.in_flight.remove(&output.task_id).is_none() {
            warn!(task_id = %output.task_id, label = %output.label, "result for a task that is not in flight");
        }
        let passthrough = self.passthrough(&output.label).unwrap_or(false);
        to_task_result(output, passthrough)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forget every in-flight task, returning `(task_id, label)` pairs.
    pub fn abandon_in_flight(&mut self) -> Vec<(TaskId, String)> {
        self.in_flight.drain().collect()
    }

    /// Shut down every backend.
    pub async fn shutdown(&mut self) {
        for (label, handle) in self.handles.iter_mut() {
            debug!(label = %label, "shutting down executor");
            handle.backend.shutdown().await;
        }
    }
}

/// Turn a backend report into a publishable result, honouring passthrough.
pub fn to_task_result(output: BackendOutput, passthrough: bool) -> TaskResult {
    match output.outcome {
        Ok(payload) => TaskResult::success(output.task_id, payload),
        Err(failure) if passthrough => TaskResult::raw_failure(output.task_id, failure.raw),
        Err(failure) => TaskResult::failure(
            output.task_id,
            &FailureEnvelope::new(FailureKind::ExecutionFailed, failure.summary),
        ),
    }
}
