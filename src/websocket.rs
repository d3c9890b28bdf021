use crate::channel::{ChannelSubscription, PresenceMemberInfo};
use crate::error::{Error, Result};
use crate::protocol::messages::PusherMessage;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Socket id in the Pusher `"high.low"` form.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct SocketId {
    pub high: u64,
    pub low: u64,
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.high, self.low)
    }
}

impl Serialize for SocketId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SocketId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for SocketId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (high, low) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid socket id: {s}"))?;
        match (high.parse::<u64>(), low.parse::<u64>()) {
            (Ok(high), Ok(low)) => Ok(SocketId { high, low }),
            _ => Err(format!("invalid socket id: {s}")),
        }
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketId {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let max: u64 = 10_000_000_000;
        SocketId {
            high: rng.random_range(0..=max),
            low: rng.random_range(0..=max),
        }
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, String> {
        s.parse()
    }
}

/// Connection state as observed by a Pusher client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Unavailable,
    Failed,
}

impl ConnectionState {
    /// Close codes 4000-4099 tell the client not to reconnect.
    pub fn after_close(code: u16) -> Self {
        if (4000..4100).contains(&code) {
            ConnectionState::Failed
        } else {
            ConnectionState::Unavailable
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Unavailable => 2,
            ConnectionState::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Unavailable,
            _ => ConnectionState::Failed,
        }
    }
}

/// What the engine hands to the transport layer for one connection.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Message(PusherMessage),
    Close { code: u16, reason: String },
}

pub struct WebSocket {
    pub socket_id: SocketId,
    pub app_id: String,
    sender: mpsc::Sender<OutboundFrame>,
    state: AtomicU8,
    subscriptions: DashMap<String, ChannelSubscription>,
}

impl WebSocket {
    pub fn new(socket_id: SocketId, app_id: String, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            socket_id,
            app_id,
            sender,
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            subscriptions: DashMap::new(),
        }
    }

    fn push(&self, frame: OutboundFrame) -> Result<()> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound buffer full for socket {}, dropping frame",
                    self.socket_id
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed(format!(
                "outbound channel of socket {} is closed",
                self.socket_id
            ))),
        }
    }
}

/// Shared handle to a connection. Cloning is cheap.
#[derive(Clone)]
pub struct WebSocketRef {
    pub socket_id: SocketId,
    pub inner: Arc<WebSocket>,
}

impl std::fmt::Debug for WebSocketRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRef")
            .field("socket_id", &self.socket_id)
            .field("app_id", &self.inner.app_id)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for WebSocketRef {
    fn eq(&self, other: &Self) -> bool {
        self.socket_id == other.socket_id
    }
}

impl Eq for WebSocketRef {}

impl Hash for WebSocketRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.socket_id.hash(state);
    }
}

impl WebSocketRef {
    pub fn new(websocket: WebSocket) -> Self {
        Self {
            socket_id: websocket.socket_id,
            inner: Arc::new(websocket),
        }
    }

    /// Creates a connection handle together with the receiving end of its
    /// bounded outbound queue.
    pub fn channel(
        socket_id: SocketId,
        app_id: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self::new(WebSocket::new(socket_id, app_id.to_string(), tx)),
            rx,
        )
    }

    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    /// Never waits: a full queue drops the frame for this socket only.
    pub fn send_message(&self, message: &PusherMessage) -> Result<()> {
        self.inner.push(OutboundFrame::Message(message.clone()))
    }

    /// Sends `pusher:error` followed by a close frame and moves the
    /// connection into the state the client will observe.
    pub fn close(&self, code: u16, reason: String) -> Result<()> {
        if matches!(
            self.state(),
            ConnectionState::Failed | ConnectionState::Unavailable
        ) {
            debug!("Socket {} already closed, skipping close frames", self.socket_id);
            return Ok(());
        }

        self.set_state(ConnectionState::after_close(code));

        if code >= 4000 {
            let error_message = PusherMessage::error(code, reason.clone(), None);
            if let Err(e) = self.inner.push(OutboundFrame::Message(error_message)) {
                warn!("Failed to send error message before close: {}", e);
            }
        }

        self.inner.push(OutboundFrame::Close { code, reason })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    /// Returns false when the socket already held a subscription to `channel`.
    pub fn add_subscription(&self, channel: &str, subscription: ChannelSubscription) -> bool {
        self.inner
            .subscriptions
            .insert(channel.to_string(), subscription)
            .is_none()
    }

    pub fn remove_subscription(&self, channel: &str) -> Option<ChannelSubscription> {
        self.inner
            .subscriptions
            .remove(channel)
            .map(|(_, subscription)| subscription)
    }

    pub fn subscription(&self, channel: &str) -> Option<ChannelSubscription> {
        self.inner
            .subscriptions
            .get(channel)
            .map(|entry| entry.value().clone())
    }

    pub fn is_subscribed_to(&self, channel: &str) -> bool {
        self.inner.subscriptions.contains_key(channel)
    }

    pub fn presence_member(&self, channel: &str) -> Option<PresenceMemberInfo> {
        self.inner
            .subscriptions
            .get(channel)
            .and_then(|entry| entry.value().presence_member().cloned())
    }

    pub fn subscribed_channels(&self) -> Vec<(String, ChannelSubscription)> {
        self.inner
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
