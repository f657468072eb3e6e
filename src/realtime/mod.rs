pub mod transport;

pub use transport::{EventKind, RealtimeEvent, RealtimeTransport, WsTransport};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::models::ChatMessage;

const STATE_SUBSCRIBING: u8 = 1;
const STATE_SUBSCRIBED: u8 = 2;
const STATE_DISPOSED: u8 = 3;

/// Lifecycle of a logical subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribing,
    Subscribed,
    Disposed,
}

/// Tears down one subscription. Calling `dispose` more than once is a no-op
/// after the first call.
pub struct Disposer {
    state: Arc<AtomicU8>,
    channel: String,
    transport: Arc<dyn RealtimeTransport>,
}

impl Disposer {
    pub fn dispose(&self) {
        let prev = self.state.swap(STATE_DISPOSED, Ordering::SeqCst);
        if prev != STATE_DISPOSED {
            self.transport.close(&self.channel);
            tracing::debug!(channel = %self.channel, "Subscription disposed");
        }
    }

    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::SeqCst) {
            STATE_SUBSCRIBING => ChannelState::Subscribing,
            STATE_SUBSCRIBED => ChannelState::Subscribed,
            STATE_DISPOSED => ChannelState::Disposed,
            _ => ChannelState::Idle,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_DISPOSED
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Opens and closes the two logical subscriptions a room session needs.
/// Each subscription runs one delivery task that applies events in transport
/// order and drops anything that races disposal.
pub struct SubscriptionManager {
    transport: Arc<dyn RealtimeTransport>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self { transport }
    }

    pub fn message_channel(room_id: &str) -> String {
        format!("room_messages:{}", room_id)
    }

    pub fn participant_channel(room_id: &str) -> String {
        format!("room_participants:{}", room_id)
    }

    /// Insert events on the room's message channel. Non-insert events and
    /// unparseable payloads are logged and skipped.
    pub async fn subscribe_messages<F, C>(
        &self,
        room_id: &str,
        on_insert: F,
        on_closed: C,
    ) -> Result<Disposer>
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.subscribe_raw(
            Self::message_channel(room_id),
            move |event| {
                if event.kind != EventKind::Insert {
                    return;
                }
                match serde_json::from_value::<ChatMessage>(event.payload) {
                    Ok(message) => on_insert(message),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unparseable message event");
                    }
                }
            },
            on_closed,
        )
        .await
    }

    /// Any-change events on the room's participant channel. The payload only
    /// carries the changed row, so consumers re-fetch the roster.
    pub async fn subscribe_participants<F, C>(
        &self,
        room_id: &str,
        on_change: F,
        on_closed: C,
    ) -> Result<Disposer>
    where
        F: Fn(RealtimeEvent) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.subscribe_raw(Self::participant_channel(room_id), on_change, on_closed)
            .await
    }

    async fn subscribe_raw<F, C>(&self, channel: String, handler: F, on_closed: C) -> Result<Disposer>
    where
        F: Fn(RealtimeEvent) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(STATE_SUBSCRIBING));
        let mut events = self.transport.open(&channel).await?;
        state.store(STATE_SUBSCRIBED, Ordering::SeqCst);

        let task_state = state.clone();
        let task_channel = channel.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // An in-flight event can race the unsubscribe; drop it.
                if task_state.load(Ordering::SeqCst) != STATE_SUBSCRIBED {
                    break;
                }
                handler(event);
            }
            // Stream ended. If nobody disposed us, the transport is gone and
            // the subscriber needs to know live updates stopped.
            if task_state.swap(STATE_DISPOSED, Ordering::SeqCst) == STATE_SUBSCRIBED {
                tracing::warn!(channel = %task_channel, "Realtime channel ended while subscribed");
                on_closed();
            }
        });

        Ok(Disposer {
            state,
            channel,
            transport: self.transport.clone(),
        })
    }
}
