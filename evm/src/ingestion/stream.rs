use std::{fmt, future::Future, sync::Arc, time::Duration};

use error_stack::{Report, Result, ResultExt};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use crate::{models::Block, provider::models::RpcHeader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    Connection,
    Decode,
}

/// Decides whether the push feed reconnects after its connection ends.
pub trait ReconnectPolicy: Send + Sync + 'static {
    /// Returns the delay before reconnection attempt `attempt`, or `None` to stop.
    ///
    /// Attempts start at 1 and count connections that ended since the last
    /// successful subscription.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Never reconnect. The stream ends with the first connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReconnect;

#[derive(Debug, Clone)]
pub struct ChainStreamOptions {
    /// Capacity of the channel between the connection and the consumer.
    pub channel_size: usize,
}

pub struct ChainStream {
    url: Url,
    options: ChainStreamOptions,
    reconnect_policy: Arc<dyn ReconnectPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Cancelled,
    Closed,
    ReceiverDropped,
}

impl ChainStream {
    pub fn new(url: Url, options: ChainStreamOptions) -> Self {
        Self {
            url,
            options,
            reconnect_policy: Arc::new(NeverReconnect),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: impl ReconnectPolicy) -> Self {
        self.reconnect_policy = Arc::new(policy);
        self
    }

    /// Returns the stream of new blocks and the future that drives the connection.
    ///
    /// The stream ends when the future completes.
    pub fn start(
        self,
        ct: CancellationToken,
    ) -> (
        ReceiverStream<Block>,
        impl Future<Output = Result<(), StreamError>>,
    ) {
        let (tx, rx) = mpsc::channel(self.options.channel_size.max(1));
        (ReceiverStream::new(rx), self.run(tx, ct))
    }

    async fn run(self, tx: mpsc::Sender<Block>, ct: CancellationToken) -> Result<(), StreamError> {
        let mut attempt = 0;

        loop {
            let last_error = match self.connect_and_read(&tx, &ct, &mut attempt).await {
                Ok(ConnectionEnd::Cancelled) | Ok(ConnectionEnd::ReceiverDropped) => return Ok(()),
                Ok(ConnectionEnd::Closed) => {
                    error!(url = %self.url, "push feed connection closed");
                    None
                }
                Err(err) => {
                    error!(url = %self.url, error = ?err, "push feed connection failed");
                    Some(err)
                }
            };

            attempt += 1;
            let Some(delay) = self.reconnect_policy.next_delay(attempt) else {
                info!("push feed ended, not reconnecting");
                return match last_error {
                    None => Ok(()),
                    Some(err) => Err(err),
                };
            };

            info!(attempt, delay = ?delay, "reconnecting to push feed");
            tokio::select! {
                _ = ct.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read new heads until the connection ends.
    ///
    /// `attempt` is reset once the subscription is sent, so the reconnect policy
    /// counts consecutive failures only.
    async fn connect_and_read(
        &self,
        tx: &mpsc::Sender<Block>,
        ct: &CancellationToken,
        attempt: &mut u32,
    ) -> Result<ConnectionEnd, StreamError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .change_context(StreamError::Connection)
            .attach_printable("failed to connect to push feed")
            .attach_printable_lazy(|| format!("url: {}", self.url))?;

        info!(url = %self.url, "connected to push feed");

        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(subscribe_new_heads_request()))
            .await
            .change_context(StreamError::Connection)
            .attach_printable("failed to send subscription request")?;

        *attempt = 0;

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Cancelled);
                }
                message = read.next() => {
                    let Some(message) = message else {
                        return Ok(ConnectionEnd::Closed);
                    };

                    let message = message
                        .change_context(StreamError::Connection)
                        .attach_printable("failed to read from push feed")?;

                    match message {
                        Message::Text(text) => match decode_frame(&text) {
                            Ok(Some(block)) => {
                                debug!(block = block.number, "received new head");
                                if tx.send(block).await.is_err() {
                                    return Ok(ConnectionEnd::ReceiverDropped);
                                }
                            }
                            Ok(None) => {}
                            Err(err) => {
                                debug!(error = ?err, "failed to decode push feed frame");
                            }
                        },
                        Message::Close(frame) => {
                            error!(frame = ?frame, "push feed closed by server");
                            return Ok(ConnectionEnd::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Decode a text frame from the push feed.
///
/// Frames other than subscription notifications yield no block.
pub fn decode_frame(text: &str) -> Result<Option<Block>, StreamError> {
    let frame: Value = serde_json::from_str(text)
        .change_context(StreamError::Decode)
        .attach_printable("frame is not valid json")?;

    if frame.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }

    let Some(result) = frame.get("params").and_then(|params| params.get("result")) else {
        return Err(Report::new(StreamError::Decode)).attach_printable("missing params.result");
    };

    let header: RpcHeader = serde_json::from_value(result.clone())
        .change_context(StreamError::Decode)
        .attach_printable("invalid block header")?;

    Ok(Some(header.into()))
}

fn subscribe_new_heads_request() -> String {
    json!({
        "id": 1,
        "jsonrpc": "2.0",
        "method": "eth_subscribe",
        "params": ["newHeads"],
    })
    .to_string()
}

impl ReconnectPolicy for NeverReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

impl Default for ChainStreamOptions {
    fn default() -> Self {
        Self { channel_size: 1024 }
    }
}

impl error_stack::Context for StreamError {}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Connection => write!(f, "push feed connection error"),
            StreamError::Decode => write!(f, "failed to decode push feed frame"),
        }
    }
}
