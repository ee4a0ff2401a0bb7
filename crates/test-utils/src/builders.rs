#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use interchange::channel::ReconnectPolicy;
use interchange::config::{
    ConfigFile, EndpointSection, ExecutorConfig, ExecutorType, InterchangeSection, RawConfigFile,
    RegistrationSection,
};
use interchange::engine::InterchangeSettings;
use interchange::registration::Backoff;
use interchange::types::{ChannelDescriptor, ExchangeType, RegistrationInfo};

/// Broker url every in-memory descriptor points at.
pub const MEMORY_URL: &str = "memory://local";

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                endpoint: EndpointSection::default(),
                registration: RegistrationSection::default(),
                interchange: InterchangeSection::default(),
                executor: BTreeMap::new(),
            },
        }
    }

    pub fn with_executor(mut self, label: &str, exec: ExecutorConfig) -> Self {
        self.config.executor.insert(label.to_string(), exec);
        self
    }

    pub fn with_endpoint_id(mut self, id: &str) -> Self {
        self.config.endpoint.endpoint_id = Some(id.to_string());
        self
    }

    pub fn with_service_url(mut self, url: &str) -> Self {
        self.config.registration.service_url = Some(url.to_string());
        self
    }

    pub fn with_drain_timeout_secs(mut self, secs: u64) -> Self {
        self.config.interchange.drain_timeout_secs = secs;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.config.interchange.prefetch = prefetch;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `process` `ExecutorConfig`.
pub struct ExecutorConfigBuilder {
    exec: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    pub fn process(cmd: &str) -> Self {
        Self {
            exec: ExecutorConfig {
                executor_type: ExecutorType::Process,
                passthrough: false,
                cmd: Some(cmd.to_string()),
                max_workers: 1,
                task_timeout_secs: None,
            },
        }
    }

    pub fn passthrough(mut self, val: bool) -> Self {
        self.exec.passthrough = val;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.exec.max_workers = n;
        self
    }

    pub fn task_timeout_secs(mut self, secs: u64) -> Self {
        self.exec.task_timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> ExecutorConfig {
        self.exec
    }
}

/// Descriptors for a direct `{prefix}.tasks` exchange and a topic
/// `{prefix}.results` exchange on the in-memory broker.
pub fn memory_registration_info(prefix: &str) -> RegistrationInfo {
    RegistrationInfo {
        tasks: ChannelDescriptor {
            exchange_name: format!("{prefix}.tasks"),
            exchange_type: ExchangeType::Direct,
            queue_url: MEMORY_URL.to_string(),
            routing_key: None,
            connection_params: BTreeMap::new(),
        },
        results: ChannelDescriptor {
            exchange_name: format!("{prefix}.results"),
            exchange_type: ExchangeType::Topic,
            queue_url: MEMORY_URL.to_string(),
            routing_key: None,
            connection_params: BTreeMap::new(),
        },
    }
}

/// Settings with short timeouts so failure paths finish quickly.
pub fn fast_settings() -> InterchangeSettings {
    InterchangeSettings {
        drain_timeout: Duration::from_millis(300),
        prefetch: 4,
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_millis(10)),
        },
        reregister_on_reconnect_failure: false,
    }
}
