// src/channel/memory.rs

//! In-process broker.
//!
//! Exchanges live in a shared map; each binding is an unbounded queue. A
//! message that no binding matches is parked on its exchange and handed to the
//! first binding that matches it later, so producers and consumers may start
//! in any order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::routing::routes;
use crate::channel::{Broker, ResultChannel, TaskChannel, decode_task, encode_result};
use crate::errors::ChannelError;
use crate::types::{ChannelDescriptor, ExchangeType, Task, TaskResult};

#[derive(Debug)]
struct Binding {
    pattern: String,
    tx: mpsc::UnboundedSender<String>,
    /// Opened through [`Broker`] (as opposed to a test/observer binding).
    opened_by_broker: bool,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeType,
    bindings: Vec<Binding>,
    parked: Vec<(String, String)>,
    /// Bumped by [`MemoryBroker::disconnect`]; invalidates result channels.
    generation: u64,
}

impl Exchange {
    fn new(kind: ExchangeType) -> Self {
        Self {
            kind,
            bindings: Vec::new(),
            parked: Vec::new(),
            generation: 0,
        }
    }

    fn route(&mut self, routing_key: &str, body: String) -> usize {
        self.bindings.retain(|b| !b.tx.is_closed());

        let mut delivered = 0;
        for binding in &self.bindings {
            if routes(self.kind, &binding.pattern, routing_key)
                && binding.tx.send(body.clone()).is_ok()
            {
                delivered += 1;
            }
        }

        if delivered == 0 {
            self.parked.push((routing_key.to_string(), body));
        }
        delivered
    }

    fn add_binding(&mut self, binding: Binding) {
        let kind = self.kind;
        let mut still_parked = Vec::new();
        for (key, body) in std::mem::take(&mut self.parked) {
            if routes(kind, &binding.pattern, &key) {
                let _ = binding.tx.send(body);
            } else {
                still_parked.push((key, body));
            }
        }
        self.parked = still_parked;
        self.bindings.push(binding);
    }
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<String, Exchange>,
    failing_opens: usize,
    opens: usize,
}

impl State {
    fn exchange(&mut self, name: &str, kind: ExchangeType) -> &mut Exchange {
        self.exchanges
            .entry(name.to_string())
            .or_insert_with(|| Exchange::new(kind))
    }

    fn record_open(&mut self, url: &str) -> Result<(), ChannelError> {
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(ChannelError::Connect {
                url: url.to_string(),
                message: "injected open failure".to_string(),
            });
        }
        self.opens += 1;
        Ok(())
    }
}

/// Cheap to clone; clones share the same exchanges.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind an observer queue on `exchange` and return its receiving end.
    pub fn bind(
        &self,
        exchange: &str,
        kind: ExchangeType,
        pattern: &str,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().exchange(exchange, kind).add_binding(Binding {
            pattern: pattern.to_string(),
            tx,
            opened_by_broker: false,
        });
        rx
    }

    /// Route a raw body; returns how many queues received it (0 = parked).
    pub fn publish_raw(
        &self,
        exchange: &str,
        kind: ExchangeType,
        routing_key: &str,
        body: String,
    ) -> usize {
        self.lock().exchange(exchange, kind).route(routing_key, body)
    }

    pub fn publish_task(
        &self,
        exchange: &str,
        kind: ExchangeType,
        routing_key: &str,
        task: &Task,
    ) -> Result<usize, ChannelError> {
        let body = serde_json::to_string(task).map_err(|e| ChannelError::Codec(e.to_string()))?;
        Ok(self.publish_raw(exchange, kind, routing_key, body))
    }

    /// Drop every broker-opened binding on `exchange` and invalidate its
    /// result channels, as if the connection to it was lost.
    pub fn disconnect(&self, exchange: &str) -> usize {
        let mut state = self.lock();
        match state.exchanges.get_mut(exchange) {
            Some(ex) => {
                let before = ex.bindings.len();
                ex.bindings.retain(|b| !b.opened_by_broker);
                ex.generation += 1;
                before - ex.bindings.len()
            }
            None => 0,
        }
    }

    /// Make the next `n` channel opens fail with a connect error.
    pub fn fail_next_opens(&self, n: usize) {
        self.lock().failing_opens = n;
    }

    /// Number of channels successfully opened so far.
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn parked(&self, exchange: &str) -> usize {
        self.lock()
            .exchanges
            .get(exchange)
            .map(|ex| ex.parked.len())
            .unwrap_or(0)
    }
}

impl Broker for MemoryBroker {
    fn open_task_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn TaskChannel>, ChannelError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.lock();
            state.record_open(&descriptor.queue_url)?;
            state
                .exchange(&descriptor.exchange_name, descriptor.exchange_type)
                .add_binding(Binding {
                    pattern: descriptor.routing_key_or(endpoint_id).to_string(),
                    tx,
                    opened_by_broker: true,
                });
            debug!(exchange = %descriptor.exchange_name, "memory task channel opened");

            Ok(Box::new(MemoryTaskChannel {
                exchange: descriptor.exchange_name.clone(),
                rx,
            }) as Box<dyn TaskChannel>)
        })
    }

    fn open_result_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ResultChannel>, ChannelError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record_open(&descriptor.queue_url)?;
            let generation = state
                .exchange(&descriptor.exchange_name, descriptor.exchange_type)
                .generation;
            debug!(exchange = %descriptor.exchange_name, "memory result channel opened");

            Ok(Box::new(MemoryResultChannel {
                broker: self.clone(),
                exchange: descriptor.exchange_name.clone(),
                kind: descriptor.exchange_type,
                routing_key: descriptor.routing_key_or(endpoint_id).to_string(),
                generation,
                closed: false,
            }) as Box<dyn ResultChannel>)
        })
    }
}

struct MemoryTaskChannel {
    exchange: String,
    rx: mpsc::UnboundedReceiver<String>,
}

impl TaskChannel for MemoryTaskChannel {
    fn next_batch(&mut self, max: usize) -> BoxFuture<'_, Result<Vec<Task>, ChannelError>> {
        Box::pin(async move {
            let mut batch = Vec::new();
            while batch.is_empty() {
                let body = self
                    .rx
                    .recv()
                    .await
                    .ok_or_else(|| ChannelError::Closed(self.exchange.clone()))?;
                batch.extend(decode_task(&self.exchange, &body));
            }
            while batch.len() < max {
                match self.rx.try_recv() {
                    Ok(body) => batch.extend(decode_task(&self.exchange, &body)),
                    Err(_) => break,
                }
            }
            Ok(batch)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.rx.close();
        })
    }
}

struct MemoryResultChannel {
    broker: MemoryBroker,
    exchange: String,
    kind: ExchangeType,
    routing_key: String,
    generation: u64,
    closed: bool,
}

impl ResultChannel for MemoryResultChannel {
    fn publish<'a>(
        &'a mut self,
        result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let body = encode_result(result)?;
            let mut state = self.broker.lock();
            let exchange = state.exchange(&self.exchange, self.kind);
            if self.closed || exchange.generation != self.generation {
                return Err(ChannelError::Closed(self.exchange.clone()));
            }
            exchange.route(&self.routing_key, body);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed = true;
        })
    }
}
