use crate::adapter::connection_manager::{ConnectionManager, SocketDescriptor};
use crate::channel::PresenceMemberInfo;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::protocol::messages::PusherMessage;
use crate::websocket::SocketId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Single-node adapter. Also serves as the local half of every
/// horizontal adapter.
pub struct LocalAdapter {
    pub namespaces: DashMap<String, Arc<Namespace>>,
    node_id: String,
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAdapter {
    pub fn new() -> Self {
        Self::with_node_id(Uuid::new_v4().to_string())
    }

    pub fn with_node_id(node_id: String) -> Self {
        Self {
            namespaces: DashMap::new(),
            node_id,
        }
    }

    pub fn get_or_create_namespace(&self, app_id: &str) -> Arc<Namespace> {
        self.namespaces
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(app_id.to_string())))
            .clone()
    }

    fn existing_namespace(&self, app_id: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(app_id).map(|ns| ns.clone())
    }

    fn describe(&self, socket_ids: impl IntoIterator<Item = SocketId>) -> HashSet<SocketDescriptor> {
        socket_ids
            .into_iter()
            .map(|socket_id| SocketDescriptor {
                node_id: self.node_id.clone(),
                socket_id,
            })
            .collect()
    }

    /// Fans a message out to the local subscribers of a channel and returns
    /// how many sockets accepted it.
    pub fn deliver(
        &self,
        app_id: &str,
        channel: &str,
        message: &PusherMessage,
        except: Option<&SocketId>,
    ) -> usize {
        let Some(namespace) = self.existing_namespace(app_id) else {
            return 0;
        };

        let mut delivered = 0;
        for socket in namespace.subscribers_of(channel, except) {
            match socket.send_message(message) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    "Skipping socket {} on channel {}: {}",
                    socket.socket_id, channel, e
                ),
            }
        }
        delivered
    }

    pub fn local_sockets(&self, app_id: &str) -> HashSet<SocketDescriptor> {
        self.existing_namespace(app_id)
            .map(|ns| self.describe(ns.get_socket_ids()))
            .unwrap_or_default()
    }

    pub fn local_sockets_count(&self, app_id: &str) -> usize {
        self.existing_namespace(app_id)
            .map(|ns| ns.sockets_count())
            .unwrap_or(0)
    }

    pub fn local_channel_sockets(&self, app_id: &str, channel: &str) -> HashSet<SocketDescriptor> {
        self.existing_namespace(app_id)
            .map(|ns| self.describe(ns.get_channel_sockets(channel)))
            .unwrap_or_default()
    }

    pub fn local_channel_members(
        &self,
        app_id: &str,
        channel: &str,
    ) -> HashMap<String, PresenceMemberInfo> {
        self.existing_namespace(app_id)
            .map(|ns| ns.get_channel_members(channel))
            .unwrap_or_default()
    }

    pub fn local_is_member(&self, app_id: &str, channel: &str, user_id: &str) -> bool {
        self.existing_namespace(app_id)
            .is_some_and(|ns| ns.presence.is_member(channel, user_id))
    }
}

#[async_trait]
impl ConnectionManager for LocalAdapter {
    async fn init(&self) {
        info!("Initializing local adapter (node {})", self.node_id);
    }

    async fn get_namespace(&self, app_id: &str) -> Arc<Namespace> {
        self.get_or_create_namespace(app_id)
    }

    async fn send_message(
        &self,
        app_id: &str,
        socket_id: &SocketId,
        message: PusherMessage,
    ) -> Result<()> {
        let connection = self
            .existing_namespace(app_id)
            .and_then(|ns| ns.get_connection(socket_id))
            .ok_or(Error::ConnectionNotFound)?;

        connection.send_message(&message)
    }

    async fn send(
        &self,
        channel: &str,
        message: PusherMessage,
        except: Option<&SocketId>,
        app_id: &str,
    ) -> Result<()> {
        let delivered = self.deliver(app_id, channel, &message, except);
        debug!(
            "Delivered {:?} on channel {} to {} local socket(s)",
            message.event, channel, delivered
        );
        Ok(())
    }

    async fn get_sockets(&self, app_id: &str) -> Result<HashSet<SocketDescriptor>> {
        Ok(self.local_sockets(app_id))
    }

    async fn get_sockets_count(&self, app_id: &str) -> Result<usize> {
        Ok(self.local_sockets_count(app_id))
    }

    async fn get_channel_sockets(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashSet<SocketDescriptor>> {
        Ok(self.local_channel_sockets(app_id, channel))
    }

    async fn get_channel_members(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashMap<String, PresenceMemberInfo>> {
        Ok(self.local_channel_members(app_id, channel))
    }

    async fn is_presence_member(
        &self,
        app_id: &str,
        channel: &str,
        user_id: &str,
    ) -> Result<bool> {
        Ok(self.local_is_member(app_id, channel, user_id))
    }

    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    fn get_node_id(&self) -> String {
        self.node_id.clone()
    }
}
