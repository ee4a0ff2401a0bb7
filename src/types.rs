// src/types.rs

//! Data model shared by the registration, channel, executor and engine layers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{InterchangeError, Result};

/// Identity of this endpoint. Assigned once and propagated to every executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub endpoint_id: String,
    pub endpoint_dir: PathBuf,
}

impl EndpointIdentity {
    pub fn new(endpoint_id: impl Into<String>, endpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            endpoint_dir: endpoint_dir.into(),
        }
    }
}

/// Routing mode of a broker exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    Topic,
}

impl FromStr for ExchangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(ExchangeType::Direct),
            "topic" => Ok(ExchangeType::Topic),
            other => Err(format!(
                "invalid exchange_type: {other} (expected \"direct\" or \"topic\")"
            )),
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeType::Direct => f.write_str("direct"),
            ExchangeType::Topic => f.write_str("topic"),
        }
    }
}

/// Everything needed to open one broker channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub exchange_name: String,
    pub exchange_type: ExchangeType,
    /// Broker URL, e.g. `tcp://broker:5672` or `memory://local`.
    pub queue_url: String,
    /// Routing key used when publishing, or binding pattern when consuming.
    /// Defaults to the endpoint id when absent.
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub connection_params: BTreeMap<String, String>,
}

impl ChannelDescriptor {
    pub fn routing_key_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.routing_key.as_deref().unwrap_or(fallback)
    }

    fn validate(&self, which: &str) -> Result<()> {
        if self.exchange_name.trim().is_empty() {
            return Err(InterchangeError::ConfigError(format!(
                "{which} channel descriptor has an empty exchange_name"
            )));
        }
        if self.queue_url.trim().is_empty() {
            return Err(InterchangeError::ConfigError(format!(
                "{which} channel descriptor has an empty queue_url"
            )));
        }
        Ok(())
    }
}

/// Channel descriptors for the inbound task and outbound result channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    #[serde(rename = "task_queue_info")]
    pub tasks: ChannelDescriptor,
    #[serde(rename = "result_queue_info")]
    pub results: ChannelDescriptor,
}

impl RegistrationInfo {
    pub fn validate(&self) -> Result<()> {
        self.tasks.validate("task")?;
        self.results.validate("result")?;
        Ok(())
    }
}

pub type TaskId = String;

/// A unit of work delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Opaque serialized function invocation.
    pub function_payload: String,
    #[serde(rename = "executor")]
    pub target_executor_label: String,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        function_payload: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            function_payload: function_payload.into(),
            target_executor_label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure,
}

/// Outcome of a task, owned by the interchange until published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Result payload on success, error payload on failure.
    pub payload: String,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Success,
            payload: payload.into(),
        }
    }

    /// Failure carrying a raw payload, forwarded verbatim.
    pub fn raw_failure(task_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failure,
            payload: payload.into(),
        }
    }

    /// Failure carrying a sanitized [`FailureEnvelope`].
    pub fn failure(task_id: impl Into<String>, envelope: &FailureEnvelope) -> Self {
        Self::raw_failure(task_id, envelope.to_payload())
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Parse the failure payload back into an envelope, if it is one.
    pub fn envelope(&self) -> Option<FailureEnvelope> {
        match self.status {
            TaskStatus::Failure => serde_json::from_str(&self.payload).ok(),
            TaskStatus::Success => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExecutionFailed,
    NoSuchExecutor,
    DispatchRejected,
    DrainTimeout,
    ShuttingDown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ExecutionFailed => "execution_failed",
            FailureKind::NoSuchExecutor => "no_such_executor",
            FailureKind::DispatchRejected => "dispatch_rejected",
            FailureKind::DrainTimeout => "drain_timeout",
            FailureKind::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Sanitized error wrapper published in place of raw backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureEnvelope {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn to_payload(&self) -> String {
        // Serializing two plain string fields cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{}: {}", self.kind, self.message))
    }
}
