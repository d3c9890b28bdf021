use crate::channel::PresenceMemberInfo;
use crate::error::Result;
use crate::namespace::Namespace;
use crate::protocol::messages::PusherMessage;
use crate::websocket::SocketId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Cluster-wide address of a socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketDescriptor {
    pub node_id: String,
    pub socket_id: SocketId,
}

/// Separates "this node" from "the cluster".
///
/// Namespace access and `send_message` are local. Every query and `send`
/// reach the whole cluster; implementations without peers answer from
/// local state only.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn init(&self);

    /// Local registry of an app, created on first use.
    async fn get_namespace(&self, app_id: &str) -> Arc<Namespace>;

    /// Delivers to one socket connected to this node.
    async fn send_message(
        &self,
        app_id: &str,
        socket_id: &SocketId,
        message: PusherMessage,
    ) -> Result<()>;

    /// Delivers to every subscriber of `channel` in the cluster except
    /// `except`, exactly once per socket.
    async fn send(
        &self,
        channel: &str,
        message: PusherMessage,
        except: Option<&SocketId>,
        app_id: &str,
    ) -> Result<()>;

    async fn get_sockets(&self, app_id: &str) -> Result<HashSet<SocketDescriptor>>;

    async fn get_sockets_count(&self, app_id: &str) -> Result<usize>;

    async fn get_channel_sockets(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashSet<SocketDescriptor>>;

    async fn get_channel_members(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashMap<String, PresenceMemberInfo>>;

    /// Distinct users in a presence channel; a user connected to several
    /// nodes counts once.
    async fn get_member_count(&self, app_id: &str, channel: &str) -> Result<usize> {
        Ok(self.get_channel_members(app_id, channel).await?.len())
    }

    async fn is_presence_member(&self, app_id: &str, channel: &str, user_id: &str)
    -> Result<bool>;

    async fn check_health(&self) -> Result<()>;

    fn get_node_id(&self) -> String;
}
