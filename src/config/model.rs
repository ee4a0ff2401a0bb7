// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::ReconnectPolicy;
use crate::engine::InterchangeSettings;
use crate::registration::{Backoff, RetryPolicy};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [endpoint]
/// endpoint_id = "6f1c0a52-..."
/// endpoint_dir = "/home/me/.endpoint"
///
/// [registration]
/// service_url = "https://control.example.org/v2"
///
/// [interchange]
/// drain_timeout_secs = 30
///
/// [executor.default]
/// type = "process"
/// cmd = "python3 -m worker"
/// max_workers = 4
/// ```
///
/// Every section except `[executor.<label>]` is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub endpoint: EndpointSection,

    #[serde(default)]
    pub registration: RegistrationSection,

    #[serde(default)]
    pub interchange: InterchangeSection,

    /// All executors from `[executor.<label>]`, keyed by label.
    #[serde(default)]
    pub executor: BTreeMap<String, ExecutorConfig>,
}

/// Validated configuration. Build it through `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    endpoint: EndpointSection,
    registration: RegistrationSection,
    interchange: InterchangeSection,
    executor: BTreeMap<String, ExecutorConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            endpoint: raw.endpoint,
            registration: raw.registration,
            interchange: raw.interchange,
            executor: raw.executor,
        }
    }

    pub fn endpoint(&self) -> &EndpointSection {
        &self.endpoint
    }

    pub fn registration(&self) -> &RegistrationSection {
        &self.registration
    }

    pub fn interchange(&self) -> &InterchangeSection {
        &self.interchange
    }

    pub fn executors(&self) -> &BTreeMap<String, ExecutorConfig> {
        &self.executor
    }
}

/// `[endpoint]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    /// May be supplied on the command line instead.
    #[serde(default)]
    pub endpoint_id: Option<String>,

    /// Human-readable name sent along at registration.
    #[serde(default)]
    pub endpoint_name: Option<String>,

    #[serde(default = "default_endpoint_dir")]
    pub endpoint_dir: PathBuf,
}

fn default_endpoint_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            endpoint_id: None,
            endpoint_name: None,
            endpoint_dir: default_endpoint_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// `[registration]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSection {
    /// Control service base url. Without it, registration info must be
    /// supplied up front.
    #[serde(default)]
    pub service_url: Option<String>,

    /// `0` retries forever.
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,

    #[serde(default = "default_registration_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_registration_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub token: Option<String>,
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_registration_initial_backoff_ms() -> u64 {
    1_000
}

fn default_registration_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            service_url: None,
            max_attempts: 0,
            backoff: default_backoff(),
            initial_backoff_ms: default_registration_initial_backoff_ms(),
            max_backoff_ms: default_registration_max_backoff_ms(),
            token: None,
        }
    }
}

impl RegistrationSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(initial),
            BackoffKind::Exponential => {
                Backoff::exponential(initial, Duration::from_millis(self.max_backoff_ms))
            }
        };
        let max_attempts = (self.max_attempts > 0).then_some(self.max_attempts);
        RetryPolicy::new(max_attempts, backoff)
    }
}

/// `[interchange]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct InterchangeSection {
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: usize,

    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,

    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,

    /// Maximum number of tasks taken from the broker in one read.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    #[serde(default = "default_reregister")]
    pub reregister_on_reconnect_failure: bool,
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_reconnect_attempts() -> usize {
    5
}

fn default_reconnect_initial_backoff_ms() -> u64 {
    500
}

fn default_reconnect_max_backoff_ms() -> u64 {
    10_000
}

fn default_prefetch() -> usize {
    16
}

fn default_reregister() -> bool {
    true
}

impl Default for InterchangeSection {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
            prefetch: default_prefetch(),
            reregister_on_reconnect_failure: default_reregister(),
        }
    }
}

impl InterchangeSection {
    pub fn settings(&self) -> InterchangeSettings {
        InterchangeSettings {
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            prefetch: self.prefetch,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_attempts,
                backoff: Backoff::exponential(
                    Duration::from_millis(self.reconnect_initial_backoff_ms),
                    Duration::from_millis(self.reconnect_max_backoff_ms),
                ),
            },
            reregister_on_reconnect_failure: self.reregister_on_reconnect_failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    /// One `sh -c <cmd>` process per task.
    Process,
}

/// `[executor.<label>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(rename = "type")]
    pub executor_type: ExecutorType,

    /// Forward raw backend errors instead of a sanitized envelope.
    #[serde(default)]
    pub passthrough: bool,

    /// Command for `process` executors.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

fn default_max_workers() -> usize {
    1
}
