// src/channel/mod.rs

//! Broker channels.
//!
//! The interchange talks to a [`Broker`] instead of a concrete message-queue
//! client. A broker opens two kinds of channel:
//! - a [`TaskChannel`], consume-only, delivering batches of [`Task`]s;
//! - a [`ResultChannel`], publish-only, accepting [`TaskResult`]s.
//!
//! [`ChannelManager`] owns one of each for the lifetime of a RUNNING
//! interchange and handles reconnects. Concrete brokers:
//! - [`MemoryBroker`]: in-process exchanges (`memory://` urls, tests).
//! - [`TcpBroker`]: line-delimited JSON over TCP (`tcp://` urls).
//! - [`UrlBroker`]: picks one of the above from the descriptor's url.

pub mod manager;
pub mod memory;
pub mod routing;
pub mod tcp;

use futures::future::BoxFuture;
use tracing::warn;

use crate::errors::ChannelError;
use crate::types::{ChannelDescriptor, Task, TaskResult};

pub use manager::{ChannelManager, ReconnectPolicy};
pub use memory::MemoryBroker;
pub use tcp::TcpBroker;

/// Consume side of the task exchange.
pub trait TaskChannel: Send {
    /// Wait for at least one task, then return it together with up to
    /// `max - 1` further tasks that are already available.
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// before completion must not lose a delivered task.
    fn next_batch(&mut self, max: usize) -> BoxFuture<'_, Result<Vec<Task>, ChannelError>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Publish side of the result exchange.
pub trait ResultChannel: Send {
    fn publish<'a>(&'a mut self, result: &'a TaskResult)
    -> BoxFuture<'a, Result<(), ChannelError>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens channels from descriptors obtained at registration.
pub trait Broker: Send + Sync {
    fn open_task_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn TaskChannel>, ChannelError>>;

    fn open_result_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ResultChannel>, ChannelError>>;
}

/// Dispatches to [`MemoryBroker`] or [`TcpBroker`] based on the url scheme.
#[derive(Debug, Clone, Default)]
pub struct UrlBroker {
    memory: MemoryBroker,
    tcp: TcpBroker,
}

impl UrlBroker {
    pub fn new(memory: MemoryBroker, tcp: TcpBroker) -> Self {
        Self { memory, tcp }
    }

    fn select(&self, url: &str) -> Result<&dyn Broker, ChannelError> {
        if url.starts_with("memory://") {
            Ok(&self.memory)
        } else if url.starts_with("tcp://") {
            Ok(&self.tcp)
        } else {
            Err(ChannelError::UnsupportedUrl(url.to_string()))
        }
    }
}

impl Broker for UrlBroker {
    fn open_task_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn TaskChannel>, ChannelError>> {
        Box::pin(async move {
            self.select(&descriptor.queue_url)?
                .open_task_channel(descriptor, endpoint_id)
                .await
        })
    }

    fn open_result_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ResultChannel>, ChannelError>> {
        Box::pin(async move {
            self.select(&descriptor.queue_url)?
                .open_result_channel(descriptor, endpoint_id)
                .await
        })
    }
}

/// Decode one task message body. Malformed bodies are logged and skipped:
/// without a task id there is nobody to report the failure to.
pub(crate) fn decode_task(exchange: &str, body: &str) -> Option<Task> {
    match serde_json::from_str::<Task>(body) {
        Ok(task) => Some(task),
        Err(e) => {
            warn!(exchange, error = %e, "discarding malformed task message");
            None
        }
    }
}

pub(crate) fn encode_result(result: &TaskResult) -> Result<String, ChannelError> {
    serde_json::to_string(result).map_err(|e| ChannelError::Codec(e.to_string()))
}
