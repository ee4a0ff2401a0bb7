// src/channel/manager.rs

//! Lifecycle of the task and result channels.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::{Broker, ResultChannel, TaskChannel};
use crate::errors::ChannelError;
use crate::registration::Backoff;
use crate::types::{RegistrationInfo, Task, TaskResult};

/// How hard to try reopening channels after a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(500), Duration::from_secs(10)),
        }
    }
}

/// Owns the two broker channels plus the in-memory buffers that make a
/// reconnect lossless:
/// - `pending`: tasks delivered by the broker but not yet handed out;
/// - `unpublished`: results whose publish has not succeeded yet.
pub struct ChannelManager {
    broker: Arc<dyn Broker>,
    endpoint_id: String,
    prefetch: usize,
    reconnect: ReconnectPolicy,
    info: Option<RegistrationInfo>,
    tasks: Option<Box<dyn TaskChannel>>,
    results: Option<Box<dyn ResultChannel>>,
    pending: VecDeque<Task>,
    unpublished: VecDeque<TaskResult>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("endpoint_id", &self.endpoint_id)
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .field("unpublished", &self.unpublished.len())
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        endpoint_id: impl Into<String>,
        prefetch: usize,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            broker,
            endpoint_id: endpoint_id.into(),
            prefetch: prefetch.max(1),
            reconnect,
            info: None,
            tasks: None,
            results: None,
            pending: VecDeque::new(),
            unpublished: VecDeque::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.tasks.is_some() && self.results.is_some()
    }

    pub fn registration_info(&self) -> Option<&RegistrationInfo> {
        self.info.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn unpublished_len(&self) -> usize {
        self.unpublished.len()
    }

    /// Open both channels. Any previously open channels are closed first;
    /// buffered tasks and results are kept.
    pub async fn open(&mut self, info: &RegistrationInfo) -> Result<(), ChannelError> {
        self.close_channels().await;

        let mut tasks = self
            .broker
            .open_task_channel(&info.tasks, &self.endpoint_id)
            .await?;

        let results = match self
            .broker
            .open_result_channel(&info.results, &self.endpoint_id)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tasks.close().await;
                return Err(e);
            }
        };

        info!(
            task_exchange = %info.tasks.exchange_name,
            result_exchange = %info.results.exchange_name,
            "broker channels open"
        );

        self.info = Some(info.clone());
        self.tasks = Some(tasks);
        self.results = Some(results);
        Ok(())
    }

    /// Next task to dispatch. Buffered tasks are handed out before the
    /// channel is read again. Cancel-safe.
    pub async fn next_task(&mut self) -> Result<Task, ChannelError> {
        loop {
            if let Some(task) = self.pending.pop_front() {
                return Ok(task);
            }

            let channel = self.tasks.as_mut().ok_or(ChannelError::NotOpen)?;
            let batch = channel.next_batch(self.prefetch).await?;
            debug!(count = batch.len(), "received task batch");
            self.pending.extend(batch);
        }
    }

    /// Remove every buffered task (used when intake stops for good).
    pub fn take_pending(&mut self) -> Vec<Task> {
        self.pending.drain(..).collect()
    }

    /// Queue `result` and publish everything queued, in order.
    ///
    /// On error the unsent results stay queued for [`flush`](Self::flush).
    pub async fn publish(&mut self, result: TaskResult) -> Result<(), ChannelError> {
        self.unpublished.push_back(result);
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        if self.unpublished.is_empty() {
            return Ok(());
        }
        let channel = self.results.as_mut().ok_or(ChannelError::NotOpen)?;

        while let Some(result) = self.unpublished.front() {
            channel.publish(result).await?;
            debug!(task_id = %result.task_id, status = ?result.status, "published result");
            self.unpublished.pop_front();
        }
        Ok(())
    }

    /// Reopen with the registration info the channels were last opened with.
    pub async fn reconnect(&mut self) -> Result<(), ChannelError> {
        let info = self.info.clone().ok_or(ChannelError::NotOpen)?;
        self.reconnect_with(info).await
    }

    /// Reopen with `info`, backing off between attempts, until the
    /// reconnect budget is spent.
    pub async fn reconnect_with(&mut self, info: RegistrationInfo) -> Result<(), ChannelError> {
        self.close_channels().await;

        let policy = self.reconnect;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.backoff.delay_for(attempt as u32);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            sleep(delay).await;

            match self.open(&info).await {
                Ok(()) => {
                    info!(
                        attempt,
                        pending = self.pending.len(),
                        unpublished = self.unpublished.len(),
                        "broker channels reopened"
                    );
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        Err(ChannelError::ReconnectExhausted {
            attempts: policy.max_attempts,
        })
    }

    /// Release both channels. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.close_channels().await {
            info!("broker channels closed");
        }
    }

    /// Drop both channels without closing them gracefully.
    pub fn discard(&mut self) {
        self.tasks = None;
        self.results = None;
    }

    async fn close_channels(&mut self) -> bool {
        let mut closed = false;
        if let Some(mut tasks) = self.tasks.take() {
            tasks.close().await;
            closed = true;
        }
        if let Some(mut results) = self.results.take() {
            results.close().await;
            closed = true;
        }
        closed
    }
}
