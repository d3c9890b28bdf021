use crate::channel::PresenceMemberInfo;
use crate::presence::PresenceStore;
use crate::websocket::{SocketId, WebSocketRef};
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use tracing::debug;

// Registry of one application's connections on this node: live sockets,
// the local subscriber set of every channel, and presence membership.
pub struct Namespace {
    pub app_id: String,
    pub sockets: DashMap<SocketId, WebSocketRef>,
    // Channel name -> subscribed socket ids. Empty sets are removed.
    pub channels: DashMap<String, DashSet<SocketId>>,
    pub presence: PresenceStore,
}

impl Namespace {
    pub fn new(app_id: String) -> Self {
        Self {
            app_id,
            sockets: DashMap::new(),
            channels: DashMap::new(),
            presence: PresenceStore::new(),
        }
    }

    pub fn add_socket(&self, socket: WebSocketRef) {
        debug!(socket_id = %socket.socket_id, app_id = %self.app_id, "Socket registered");
        self.sockets.insert(socket.socket_id, socket);
    }

    pub fn get_connection(&self, socket_id: &SocketId) -> Option<WebSocketRef> {
        self.sockets
            .get(socket_id)
            .map(|conn_ref| conn_ref.value().clone())
    }

    /// Drops the socket and takes it out of every channel it was in. The
    /// returned handle still lists its subscriptions, so presence leaves can
    /// be processed by the caller.
    pub fn remove_connection(&self, socket_id: &SocketId) -> Option<WebSocketRef> {
        let (_, socket) = self.sockets.remove(socket_id)?;

        for (channel, _) in socket.subscribed_channels() {
            self.unsubscribe(&channel, socket_id);
        }

        // Subscriptions are recorded on the socket after the registry insert,
        // so sweep for any set that still holds the id.
        let leftovers: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| entry.value().contains(socket_id))
            .map(|entry| entry.key().clone())
            .collect();
        for channel in leftovers {
            self.unsubscribe(&channel, socket_id);
        }

        debug!("Removed socket {} from namespace {}", socket_id, self.app_id);
        Some(socket)
    }

    /// Returns true if the socket was newly added to the channel.
    pub fn subscribe(&self, channel: &str, socket_id: &SocketId) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(*socket_id)
    }

    pub fn unsubscribe(&self, channel: &str, socket_id: &SocketId) -> bool {
        let Some(channel_sockets) = self.channels.get(channel) else {
            return false;
        };
        let removed = channel_sockets.remove(socket_id).is_some();
        drop(channel_sockets);

        if self
            .channels
            .remove_if(channel, |_, set| set.is_empty())
            .is_some()
        {
            debug!("Removed empty channel entry: {}", channel);
        }
        removed
    }

    /// Live subscriber handles of a channel, minus `except`.
    pub fn subscribers_of(&self, channel: &str, except: Option<&SocketId>) -> Vec<WebSocketRef> {
        let Some(channel_sockets) = self.channels.get(channel) else {
            return Vec::new();
        };
        let socket_ids: Vec<SocketId> = channel_sockets
            .iter()
            .map(|entry| *entry.key())
            .filter(|socket_id| except != Some(socket_id))
            .collect();
        drop(channel_sockets);

        socket_ids
            .iter()
            .filter_map(|socket_id| self.get_connection(socket_id))
            .collect()
    }

    pub fn get_channel_sockets(&self, channel: &str) -> Vec<SocketId> {
        self.channels
            .get(channel)
            .map(|set| set.iter().map(|entry| *entry.key()).collect())
            .unwrap_or_default()
    }

    pub fn get_channel_socket_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, socket_id: &SocketId, channel: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|channel_sockets| channel_sockets.contains(socket_id))
    }

    pub fn sockets_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn get_socket_ids(&self) -> Vec<SocketId> {
        self.sockets.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get_channel_members(&self, channel: &str) -> HashMap<String, PresenceMemberInfo> {
        self.presence.local_members(channel)
    }
}
