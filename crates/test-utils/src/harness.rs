use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use interchange::channel::{Broker, MemoryBroker};
use interchange::engine::{Interchange, InterchangeSettings};
use interchange::exec::ExecutorRegistry;
use interchange::registration::RegistrationClient;
use interchange::types::{EndpointIdentity, RegistrationInfo, Task, TaskResult};

use crate::builders::{fast_settings, memory_registration_info};

/// An in-memory broker plus an observer bound to every result published on
/// the results exchange.
pub struct BrokerHarness {
    pub broker: MemoryBroker,
    pub info: RegistrationInfo,
    pub endpoint_id: String,
    results: mpsc::UnboundedReceiver<String>,
}

impl BrokerHarness {
    pub fn new(endpoint_id: &str) -> Self {
        let broker = MemoryBroker::new();
        let info = memory_registration_info(endpoint_id);
        let results = broker.bind(&info.results.exchange_name, info.results.exchange_type, "#");
        Self {
            broker,
            info,
            endpoint_id: endpoint_id.to_string(),
            results,
        }
    }

    pub fn identity(&self) -> EndpointIdentity {
        EndpointIdentity::new(self.endpoint_id.clone(), std::env::temp_dir())
    }

    pub fn broker_arc(&self) -> Arc<dyn Broker> {
        Arc::new(self.broker.clone())
    }

    /// Publish `task` on the tasks exchange, routed to this endpoint.
    pub fn send_task(&self, task: &Task) {
        self.broker
            .publish_task(
                &self.info.tasks.exchange_name,
                self.info.tasks.exchange_type,
                &self.endpoint_id,
                task,
            )
            .expect("task should encode");
    }

    /// Next published result, waiting up to 5 seconds.
    pub async fn next_result(&mut self) -> TaskResult {
        let body = tokio::time::timeout(Duration::from_secs(5), self.results.recv())
            .await
            .expect("timed out waiting for a published result")
            .expect("results observer closed");
        serde_json::from_str(&body).expect("published result should decode")
    }

    /// Collect `n` results.
    pub async fn results(&mut self, n: usize) -> Vec<TaskResult> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_result().await);
        }
        out
    }

    /// Every result published so far, without waiting.
    pub fn drain_published(&mut self) -> Vec<TaskResult> {
        let mut out = Vec::new();
        while let Ok(body) = self.results.try_recv() {
            out.push(serde_json::from_str(&body).expect("published result should decode"));
        }
        out
    }

    /// Interchange on this broker with pre-supplied descriptors.
    pub fn interchange(&self, registry: ExecutorRegistry) -> Interchange {
        self.interchange_with(
            registry,
            Some(self.info.clone()),
            RegistrationClient::disabled(),
            fast_settings(),
        )
    }

    pub fn interchange_with(
        &self,
        registry: ExecutorRegistry,
        reg_info: Option<RegistrationInfo>,
        registration: RegistrationClient,
        settings: InterchangeSettings,
    ) -> Interchange {
        Interchange::new(
            self.identity(),
            settings,
            registry,
            reg_info,
            registration,
            self.broker_arc(),
        )
        .expect("interchange should construct")
    }
}
