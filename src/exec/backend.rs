// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The registry talks to an `ExecutorBackend` instead of a concrete worker
//! pool. Every backend offers the same three capabilities:
//! - `bind`: attach to the endpoint identity and the registry's result sink;
//! - `submit`: enqueue a task without waiting for it to finish;
//! - `shutdown`: release workers.
//!
//! Results flow back through the [`ResultSink`] handed over at bind time.
//! [`ProcessExecutor`] is the production implementation; tests provide their
//! own backends that compute results in-process.

use std::time::Duration;

use futures::future::{self, BoxFuture};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::{InterchangeError, Result};
use crate::exec::executor_loop::spawn_executor;
use crate::types::{EndpointIdentity, Task, TaskId};

/// A failed execution as the backend saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Short, sanitized description safe to publish.
    pub summary: String,
    /// Raw error text, forwarded only for passthrough executors.
    pub raw: String,
}

/// What a backend reports for one task.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub label: String,
    pub task_id: TaskId,
    pub outcome: std::result::Result<String, BackendFailure>,
}

/// Sending half of the registry's merged result stream, tagged with the
/// label of the backend it was handed to.
#[derive(Debug, Clone)]
pub struct ResultSink {
    label: String,
    tx: mpsc::UnboundedSender<BackendOutput>,
}

impl ResultSink {
    pub fn new(label: impl Into<String>, tx: mpsc::UnboundedSender<BackendOutput>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Report an outcome. Returns `false` if the registry is gone.
    pub fn send(
        &self,
        task_id: impl Into<TaskId>,
        outcome: std::result::Result<String, BackendFailure>,
    ) -> bool {
        self.tx
            .send(BackendOutput {
                label: self.label.clone(),
                task_id: task_id.into(),
                outcome,
            })
            .is_ok()
    }
}

/// Capability set shared by every executor backend.
pub trait ExecutorBackend: Send {
    /// Short name of the backend kind, for logs and dry runs.
    fn kind(&self) -> &'static str;

    /// Bind to the endpoint. Called exactly once, before any `submit`.
    fn bind(&mut self, identity: &EndpointIdentity, sink: ResultSink) -> Result<()>;

    /// Endpoint this backend is bound to, if any.
    fn endpoint_id(&self) -> Option<&str>;

    /// Enqueue `task`. Must not wait for the task to complete.
    fn submit(&mut self, task: Task) -> BoxFuture<'_, Result<()>>;

    /// Stop accepting tasks and release workers. Safe to call repeatedly.
    fn shutdown(&mut self) -> BoxFuture<'_, ()>;
}

/// Settings for [`ProcessExecutor`].
#[derive(Debug, Clone)]
pub struct ProcessExecutorOptions {
    /// Shell command run once per task; the payload is written to stdin.
    pub cmd: String,
    pub max_workers: usize,
    pub task_timeout: Option<Duration>,
}

/// Runs every task as a `sh -c <cmd>` process on a bounded worker pool.
pub struct ProcessExecutor {
    options: ProcessExecutorOptions,
    endpoint_id: Option<String>,
    label: Option<String>,
    tx: Option<mpsc::UnboundedSender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessExecutor {
    pub fn new(options: ProcessExecutorOptions) -> Self {
        Self {
            options,
            endpoint_id: None,
            label: None,
            tx: None,
            handle: None,
        }
    }

    fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| "<unbound>".to_string())
    }
}

impl ExecutorBackend for ProcessExecutor {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn bind(&mut self, identity: &EndpointIdentity, sink: ResultSink) -> Result<()> {
        if self.endpoint_id.is_some() {
            return Err(InterchangeError::ConfigError(format!(
                "executor '{}' is already bound",
                sink.label()
            )));
        }

        self.label = Some(sink.label().to_string());
        let (tx, handle) = spawn_executor(self.options.clone(), identity.clone(), sink);
        self.tx = Some(tx);
        self.handle = Some(handle);
        self.endpoint_id = Some(identity.endpoint_id.clone());
        Ok(())
    }

    fn endpoint_id(&self) -> Option<&str> {
        self.endpoint_id.as_deref()
    }

    fn submit(&mut self, task: Task) -> BoxFuture<'_, Result<()>> {
        let sent = match &self.tx {
            Some(tx) => tx.send(task).map_err(|_| "executor queue is closed"),
            None => Err("executor is not running"),
        };
        let result = sent.map_err(|message| InterchangeError::Dispatch {
            label: self.label(),
            message: message.to_string(),
        });
        Box::pin(future::ready(result))
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.tx = None;
            if let Some(handle) = self.handle.take() {
                info!(label = %self.label(), "stopping process executor");
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        debug!(error = %e, "process executor loop ended abnormally");
                    }
                }
            }
        })
    }
}
