use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{ClientError, Result};

/// A change notification delivered on a realtime channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub channel: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// Transport seam for the realtime engine. The production implementation
/// speaks WebSocket; tests inject an in-memory double that emits events
/// directly.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a logical channel. Events arrive on the returned receiver until
    /// the channel is closed or the transport disconnects; the stream ending
    /// while the channel is still wanted means live updates are degraded.
    async fn open(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<RealtimeEvent>>;

    /// Close a logical channel. Safe to call for a channel that is already
    /// closed or was never opened.
    fn close(&self, channel: &str);
}

/// Frame sent to the realtime endpoint to manage channel membership
#[derive(Debug, Serialize)]
struct ControlFrame<'a> {
    action: &'a str,
    channel: &'a str,
}

/// WebSocket implementation of [`RealtimeTransport`]. One connection carries
/// every channel; inbound events are routed to per-channel senders. There is
/// no automatic reconnection: when the connection drops, all channel streams
/// end and the owner decides what to do.
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    routes: Arc<DashMap<String, mpsc::UnboundedSender<RealtimeEvent>>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsTransport {
    pub async fn connect(url: &str, api_key: &str) -> Result<Self> {
        let endpoint = format!("{}?apikey={}", url, api_key);
        let (socket, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| ClientError::Subscription(format!("Realtime connect failed: {}", e)))?;

        tracing::info!(url = %url, "Realtime transport connected");

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let routes: Arc<DashMap<String, mpsc::UnboundedSender<RealtimeEvent>>> =
            Arc::new(DashMap::new());

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_routes = routes.clone();
        let reader = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeEvent>(&text) {
                        Ok(event) => {
                            if let Some(route) = reader_routes.get(&event.channel) {
                                let _ = route.send(event);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable realtime frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Realtime connection closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Realtime connection error");
                        break;
                    }
                    _ => {}
                }
            }
            // Dropping the senders ends every channel stream, which is how
            // subscribers learn the transport is gone.
            reader_routes.clear();
        });

        Ok(Self {
            outbound,
            routes,
            reader,
            writer,
        })
    }

    fn send_control(&self, action: &str, channel: &str) -> Result<()> {
        let frame = serde_json::to_string(&ControlFrame { action, channel })?;
        self.outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| ClientError::Subscription("Realtime connection is closed".to_string()))
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn open(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<RealtimeEvent>> {
        if self.routes.contains_key(channel) {
            return Err(ClientError::Subscription(format!(
                "Channel {} is already open",
                channel
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(channel.to_string(), tx);

        if let Err(e) = self.send_control("subscribe", channel) {
            self.routes.remove(channel);
            return Err(e);
        }

        tracing::debug!(channel = %channel, "Realtime channel opened");
        Ok(rx)
    }

    fn close(&self, channel: &str) {
        if self.routes.remove(channel).is_some() {
            let _ = self.send_control("unsubscribe", channel);
            tracing::debug!(channel = %channel, "Realtime channel closed");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
