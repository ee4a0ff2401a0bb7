// src/channel/tcp.rs

//! Line-delimited JSON broker protocol over TCP.
//!
//! Each channel is its own connection. The first line sent is a
//! [`HelloFrame`] declaring what the connection is for:
//!
//! ```text
//! -> {"op":"subscribe","exchange":"tasks","exchange_type":"direct","binding":"<endpoint>"}
//! <- {"task_id":"1","function_payload":"...","executor":"default"}
//! <- ...
//!
//! -> {"op":"publish","exchange":"results","exchange_type":"topic"}
//! -> {"routing_key":"<endpoint>","result":{"task_id":"1","status":"success","payload":"..."}}
//! ```

use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::channel::{Broker, ResultChannel, TaskChannel, decode_task};
use crate::errors::ChannelError;
use crate::types::{ChannelDescriptor, ExchangeType, Task, TaskResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HelloFrame {
    Subscribe {
        exchange: String,
        exchange_type: ExchangeType,
        binding: String,
    },
    Publish {
        exchange: String,
        exchange_type: ExchangeType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishFrame {
    pub routing_key: String,
    pub result: TaskResult,
}

#[derive(Debug, Clone, Default)]
pub struct TcpBroker;

impl TcpBroker {
    pub fn new() -> Self {
        Self
    }
}

fn broker_addr(url: &str) -> Result<&str, ChannelError> {
    url.strip_prefix("tcp://")
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|addr| !addr.is_empty())
        .ok_or_else(|| ChannelError::UnsupportedUrl(url.to_string()))
}

fn connect_timeout(descriptor: &ChannelDescriptor) -> Duration {
    descriptor
        .connection_params
        .get("connect_timeout_ms")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
}

fn codec_error(err: LinesCodecError) -> ChannelError {
    match err {
        LinesCodecError::Io(e) => ChannelError::Io(e),
        other => ChannelError::Codec(other.to_string()),
    }
}

async fn connect(
    descriptor: &ChannelDescriptor,
    hello: &HelloFrame,
) -> Result<Framed<TcpStream, LinesCodec>, ChannelError> {
    let url = &descriptor.queue_url;
    let addr = broker_addr(url)?;

    let stream = tokio::time::timeout(connect_timeout(descriptor), TcpStream::connect(addr))
        .await
        .map_err(|_| ChannelError::Connect {
            url: url.clone(),
            message: "connect timed out".to_string(),
        })?
        .map_err(|e| ChannelError::Connect {
            url: url.clone(),
            message: e.to_string(),
        })?;
    stream.set_nodelay(true)?;

    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let line = serde_json::to_string(hello).map_err(|e| ChannelError::Codec(e.to_string()))?;
    framed.send(line).await.map_err(codec_error)?;

    info!(url = %url, exchange = %descriptor.exchange_name, "tcp channel connected");
    Ok(framed)
}

impl Broker for TcpBroker {
    fn open_task_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn TaskChannel>, ChannelError>> {
        Box::pin(async move {
            let hello = HelloFrame::Subscribe {
                exchange: descriptor.exchange_name.clone(),
                exchange_type: descriptor.exchange_type,
                binding: descriptor.routing_key_or(endpoint_id).to_string(),
            };
            let framed = connect(descriptor, &hello).await?;
            Ok(Box::new(TcpTaskChannel {
                exchange: descriptor.exchange_name.clone(),
                framed,
            }) as Box<dyn TaskChannel>)
        })
    }

    fn open_result_channel<'a>(
        &'a self,
        descriptor: &'a ChannelDescriptor,
        endpoint_id: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ResultChannel>, ChannelError>> {
        Box::pin(async move {
            let hello = HelloFrame::Publish {
                exchange: descriptor.exchange_name.clone(),
                exchange_type: descriptor.exchange_type,
            };
            let framed = connect(descriptor, &hello).await?;
            Ok(Box::new(TcpResultChannel {
                routing_key: descriptor.routing_key_or(endpoint_id).to_string(),
                framed,
            }) as Box<dyn ResultChannel>)
        })
    }
}

struct TcpTaskChannel {
    exchange: String,
    framed: Framed<TcpStream, LinesCodec>,
}

impl TaskChannel for TcpTaskChannel {
    fn next_batch(&mut self, max: usize) -> BoxFuture<'_, Result<Vec<Task>, ChannelError>> {
        Box::pin(async move {
            let mut batch = Vec::new();
            while batch.is_empty() {
                let line = match self.framed.next().await {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => return Err(codec_error(e)),
                    None => return Err(ChannelError::Closed(self.exchange.clone())),
                };
                batch.extend(decode_task(&self.exchange, &line));
            }

            // Take whatever is already buffered without waiting for more.
            while batch.len() < max {
                match self.framed.next().now_or_never() {
                    Some(Some(Ok(line))) => batch.extend(decode_task(&self.exchange, &line)),
                    Some(Some(Err(e))) => {
                        warn!(exchange = %self.exchange, error = %e, "error reading buffered task frame");
                        break;
                    }
                    Some(None) | None => break,
                }
            }
            Ok(batch)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = SinkExt::<String>::close(&mut self.framed).await {
                debug!(error = %e, "error closing tcp task channel");
            }
        })
    }
}

struct TcpResultChannel {
    routing_key: String,
    framed: Framed<TcpStream, LinesCodec>,
}

impl ResultChannel for TcpResultChannel {
    fn publish<'a>(
        &'a mut self,
        result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let frame = PublishFrame {
                routing_key: self.routing_key.clone(),
                result: result.clone(),
            };
            let line = serde_json::to_string(&frame).map_err(|e| ChannelError::Codec(e.to_string()))?;
            self.framed.send(line).await.map_err(codec_error)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = SinkExt::<String>::close(&mut self.framed).await {
                debug!(error = %e, "error closing tcp result channel");
            }
        })
    }
}
