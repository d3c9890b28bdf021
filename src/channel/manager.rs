use super::PresenceMemberInfo;
use super::types::{ChannelSubscription, ChannelType};
use crate::adapter::ConnectionManager;
use crate::app::config::App;
use crate::app::manager::AppManager;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::options::{EventLimits, PresenceConfig};
use crate::protocol::constants::{ACTIVITY_TIMEOUT, CLIENT_EVENT_PREFIX};
use crate::protocol::messages::{PresenceData, PusherMessage};
use crate::quota::{QuotaPolicy, QuotaRejection};
use crate::websocket::{ConnectionState, OutboundFrame, SocketId, WebSocketRef};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, error, info, warn};

const CHANNEL_LOCK_STRIPES: usize = 64;
const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// A `pusher:subscribe` request as handed over by the connection layer.
/// Authorization of private and presence channels already happened upstream;
/// `auth` only has to be present.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub auth: Option<String>,
    pub channel_data: Option<Value>,
}

impl SubscriptionRequest {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            auth: None,
            channel_data: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_channel_data(mut self, channel_data: Value) -> Self {
        self.channel_data = Some(channel_data);
        self
    }

    pub fn from_message(message: &PusherMessage) -> Result<Self> {
        let data = message
            .data
            .as_ref()
            .map(|data| data.parsed_value())
            .unwrap_or(Value::Null);

        let channel = data
            .get("channel")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| message.channel.clone())
            .ok_or_else(|| Error::InvalidMessageFormat("Missing channel in subscribe".into()))?;

        Ok(Self {
            channel,
            auth: data.get("auth").and_then(Value::as_str).map(String::from),
            channel_data: data.get("channel_data").filter(|v| !v.is_null()).cloned(),
        })
    }
}

/// A `client-*` event sent by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEventRequest {
    pub event: String,
    pub channel: String,
    pub data: Value,
}

impl ClientEventRequest {
    pub fn from_message(message: &PusherMessage) -> Result<Self> {
        let event = message
            .event
            .clone()
            .ok_or_else(|| Error::InvalidMessageFormat("Missing event name".into()))?;
        let channel = message
            .channel
            .clone()
            .ok_or_else(|| Error::InvalidMessageFormat("Missing channel".into()))?;
        let data = message
            .data
            .as_ref()
            .map(|data| data.to_value())
            .unwrap_or(Value::Null);

        Ok(Self {
            event,
            channel,
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub success: bool,
    /// Local subscribers of the channel after the join.
    pub channel_connections: usize,
    pub member: Option<PresenceMemberInfo>,
    pub rejection: Option<QuotaRejection>,
}

impl JoinResponse {
    fn joined(channel_connections: usize, member: Option<PresenceMemberInfo>) -> Self {
        Self {
            success: true,
            channel_connections,
            member,
            rejection: None,
        }
    }

    fn rejected(rejection: QuotaRejection) -> Self {
        Self {
            success: false,
            channel_connections: 0,
            member: None,
            rejection: Some(rejection),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveResponse {
    pub left: bool,
    pub remaining_connections: usize,
    /// Set when the user's last socket in the cluster left a presence channel.
    pub member_removed: Option<PresenceMemberInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEventOutcome {
    Relayed,
    /// Protocol violation, dropped without telling the sender.
    Ignored,
    /// The sender was told with a 4301 `pusher:error`.
    Rejected(QuotaRejection),
}

/// Orchestrates connect, subscribe, unsubscribe, disconnect and client
/// events for the sockets of this node.
///
/// Registry mutations for one `(app, channel)` pair run under a striped
/// lock, and connection admission runs under a per-app stripe. Cluster
/// queries are always awaited with no lock held; the local changes made
/// while they were in flight are re-checked once the lock is taken.
pub struct ChannelManager {
    connection_manager: Arc<dyn ConnectionManager + Send + Sync>,
    app_manager: Arc<dyn AppManager + Send + Sync>,
    presence: PresenceConfig,
    event_limits: EventLimits,
    activity_timeout: u64,
    buffer_capacity: usize,
    channel_locks: Vec<Mutex<()>>,
    lock_hasher: ahash::RandomState,
}

impl ChannelManager {
    pub fn new(
        connection_manager: Arc<dyn ConnectionManager + Send + Sync>,
        app_manager: Arc<dyn AppManager + Send + Sync>,
        presence: PresenceConfig,
        event_limits: EventLimits,
    ) -> Self {
        Self {
            connection_manager,
            app_manager,
            presence,
            event_limits,
            activity_timeout: ACTIVITY_TIMEOUT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            channel_locks: (0..CHANNEL_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            lock_hasher: ahash::RandomState::new(),
        }
    }

    pub fn with_activity_timeout(mut self, activity_timeout: u64) -> Self {
        self.activity_timeout = activity_timeout;
        self
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Creates the handle for a newly accepted connection together with the
    /// receiving end of its outbound queue, sized to the configured buffer.
    /// The handle is registered by [`connect`](Self::connect).
    pub fn open_socket(&self, app_id: &str) -> (WebSocketRef, mpsc::Receiver<OutboundFrame>) {
        WebSocketRef::channel(SocketId::new(), app_id, self.buffer_capacity)
    }

    pub fn connection_manager(&self) -> &Arc<dyn ConnectionManager + Send + Sync> {
        &self.connection_manager
    }

    async fn lock_channel(&self, app_id: &str, channel: &str) -> MutexGuard<'_, ()> {
        let stripe = self.lock_hasher.hash_one((app_id, channel)) as usize % self.channel_locks.len();
        self.channel_locks[stripe].lock().await
    }

    async fn lock_app(&self, app_id: &str) -> MutexGuard<'_, ()> {
        let stripe = self.lock_hasher.hash_one(app_id) as usize % self.channel_locks.len();
        self.channel_locks[stripe].lock().await
    }

    async fn find_app(&self, app_id: &str) -> Result<App> {
        let app = self
            .app_manager
            .find_by_id(app_id)
            .await?
            .ok_or(Error::ApplicationNotFound)?;
        if !app.enabled {
            return Err(Error::ApplicationDisabled);
        }
        Ok(app)
    }

    async fn policy_for(&self, app_id: &str) -> Result<QuotaPolicy> {
        let app = self.find_app(app_id).await?;
        Ok(QuotaPolicy::for_app(&app, &self.presence, &self.event_limits))
    }

    async fn namespace(&self, app_id: &str) -> Arc<Namespace> {
        self.connection_manager.get_namespace(app_id).await
    }

    async fn socket(&self, app_id: &str, socket_id: &SocketId) -> Result<(Arc<Namespace>, WebSocketRef)> {
        let namespace = self.namespace(app_id).await;
        let socket = namespace
            .get_connection(socket_id)
            .ok_or(Error::ConnectionNotFound)?;
        Ok((namespace, socket))
    }

    /// Admits a freshly handshaken socket.
    ///
    /// A refused socket gets `pusher:error` plus a close frame carrying the
    /// error's close code and is never registered.
    pub async fn connect(&self, app_id: &str, socket: WebSocketRef) -> Result<()> {
        let policy = match self.policy_for(app_id).await {
            Ok(policy) => policy,
            Err(e) => return Self::refuse(app_id, &socket, e),
        };

        let namespace = self.namespace(app_id).await;
        let local_before = namespace.sockets_count();
        let current = self.connection_manager.get_sockets_count(app_id).await?;

        {
            let _guard = self.lock_app(app_id).await;
            let admitted_since = namespace.sockets_count().saturating_sub(local_before);
            if policy
                .check_connection_admission(current.saturating_add(admitted_since))
                .is_err()
            {
                return Self::refuse(app_id, &socket, Error::OverConnectionQuota);
            }
            namespace.add_socket(socket.clone());
        }

        socket.set_state(ConnectionState::Connected);
        socket.send_message(&PusherMessage::connection_established(
            socket.socket_id.to_string(),
            self.activity_timeout,
        ))?;

        info!("Socket {} connected to app {}", socket.socket_id, app_id);
        Ok(())
    }

    fn refuse(app_id: &str, socket: &WebSocketRef, e: Error) -> Result<()> {
        warn!(
            "Refusing socket {} for app {}: {}",
            socket.socket_id, app_id, e
        );
        if let Err(close_err) = socket.close(e.close_code(), e.to_string()) {
            debug!("Socket {} gone before close: {}", socket.socket_id, close_err);
        }
        Err(e)
    }

    pub async fn subscribe(
        &self,
        socket_id: &SocketId,
        app_id: &str,
        request: &SubscriptionRequest,
    ) -> Result<JoinResponse> {
        let (namespace, socket) = self.socket(app_id, socket_id).await?;
        let channel = request.channel.as_str();

        if socket.is_subscribed_to(channel) {
            debug!("Socket {} already subscribed to {}", socket_id, channel);
            self.send_subscription_succeeded(app_id, &socket, channel)
                .await?;
            return Ok(JoinResponse::joined(
                namespace.get_channel_socket_count(channel),
                socket.presence_member(channel),
            ));
        }

        let subscription = match self.prepare_subscription(&socket, request) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.send_subscription_error(&socket, channel, &e);
                return Err(e);
            }
        };

        let policy = self.policy_for(app_id).await?;
        let mut was_cluster_member = false;
        // (cluster member count, local member count before the query)
        let mut queried_members = None;

        if let Some(member) = subscription.presence_member() {
            // Cluster queries first, with no lock held.
            was_cluster_member = self
                .connection_manager
                .is_presence_member(app_id, channel, &member.user_id)
                .await?;

            let mut admission = policy.check_presence_member_size(member.user_info.as_ref());
            if admission.is_ok() && !was_cluster_member {
                let local_before = namespace.presence.member_count(channel);
                let members = self
                    .connection_manager
                    .get_member_count(app_id, channel)
                    .await?;
                queried_members = Some((members, local_before));
                admission = policy.check_presence_admission(members, true);
            }

            if let Err(rejection) = admission {
                return Self::reject_presence(&socket, channel, member, rejection);
            }
        }

        let (first_local_socket, channel_connections) = {
            let _guard = self.lock_channel(app_id, channel).await;

            if let Some(member) = subscription.presence_member()
                && let Some((members, local_before)) = queried_members
                && !namespace.presence.is_member(channel, &member.user_id)
            {
                let joined_since = namespace
                    .presence
                    .member_count(channel)
                    .saturating_sub(local_before);
                if let Err(rejection) =
                    policy.check_presence_admission(members.saturating_add(joined_since), true)
                {
                    return Self::reject_presence(&socket, channel, member, rejection);
                }
            }

            // Recorded on the socket before the liveness check so that a
            // concurrent disconnect either sees it or is seen here.
            socket.add_subscription(channel, subscription.clone());
            if namespace.get_connection(socket_id).is_none() {
                socket.remove_subscription(channel);
                debug!(
                    "Socket {} disconnected while subscribing to {}",
                    socket_id, channel
                );
                return Err(Error::ConnectionNotFound);
            }

            namespace.subscribe(channel, socket_id);
            let first_local_socket = subscription
                .presence_member()
                .is_some_and(|member| namespace.presence.join(channel, member, *socket_id));
            (first_local_socket, namespace.get_channel_socket_count(channel))
        };

        // Registered by now; a failed confirmation is only logged.
        if let Err(e) = self
            .send_subscription_succeeded(app_id, &socket, channel)
            .await
        {
            warn!(
                "Could not confirm subscription of {} to {}: {}",
                socket_id, channel, e
            );
        }

        let member = subscription.presence_member().cloned();
        if let Some(member) = &member
            && first_local_socket
            && !was_cluster_member
        {
            let member_added = PusherMessage::member_added(
                channel.to_string(),
                member.user_id.clone(),
                member.user_info.clone(),
            );
            self.connection_manager
                .send(channel, member_added, Some(socket_id), app_id)
                .await?;
        }

        debug!(
            "Socket {} subscribed to {} ({} local subscribers)",
            socket_id, channel, channel_connections
        );
        Ok(JoinResponse::joined(channel_connections, member))
    }

    fn reject_presence(
        socket: &WebSocketRef,
        channel: &str,
        member: &PresenceMemberInfo,
        rejection: QuotaRejection,
    ) -> Result<JoinResponse> {
        info!(
            "Presence subscription of user {} to {} refused: {}",
            member.user_id, channel, rejection
        );
        socket.send_message(&PusherMessage::subscription_error(
            channel.to_string(),
            rejection.kind(),
            rejection.status(),
            rejection.message(),
        ))?;
        Ok(JoinResponse::rejected(rejection))
    }

    fn prepare_subscription(
        &self,
        socket: &WebSocketRef,
        request: &SubscriptionRequest,
    ) -> Result<ChannelSubscription> {
        let channel_type = ChannelType::from_name(&request.channel);

        if channel_type.requires_authentication() && request.auth.is_none() {
            return Err(Error::Auth(format!(
                "Channel {} requires authentication",
                request.channel
            )));
        }

        match channel_type {
            ChannelType::Public => Ok(ChannelSubscription::Public),
            ChannelType::Private | ChannelType::PrivateEncrypted => {
                Ok(ChannelSubscription::Private)
            }
            ChannelType::Presence => {
                let channel_data = request.channel_data.as_ref().ok_or_else(|| {
                    Error::Channel(format!(
                        "Socket {} sent no channel_data for presence channel {}",
                        socket.socket_id, request.channel
                    ))
                })?;
                PresenceMemberInfo::from_channel_data(channel_data)
                    .map(ChannelSubscription::Presence)
            }
        }
    }

    async fn send_subscription_succeeded(
        &self,
        app_id: &str,
        socket: &WebSocketRef,
        channel: &str,
    ) -> Result<()> {
        let presence_data = if ChannelType::from_name(channel) == ChannelType::Presence {
            let members = self
                .connection_manager
                .get_channel_members(app_id, channel)
                .await?;
            Some(PresenceData::from_members(&members))
        } else {
            None
        };

        socket.send_message(&PusherMessage::subscription_succeeded(
            channel.to_string(),
            presence_data,
        ))
    }

    fn send_subscription_error(&self, socket: &WebSocketRef, channel: &str, e: &Error) {
        let (kind, status) = match e {
            Error::Auth(_) => ("AuthError", 401),
            _ => ("InvalidSubscription", e.close_code()),
        };
        let frame = PusherMessage::subscription_error(channel.to_string(), kind, status, e.to_string());
        if let Err(send_err) = socket.send_message(&frame) {
            debug!("Could not report subscription error: {}", send_err);
        }
    }

    /// Idempotent: leaving a channel the socket is not in changes nothing.
    pub async fn unsubscribe(
        &self,
        socket_id: &SocketId,
        app_id: &str,
        channel: &str,
    ) -> Result<LeaveResponse> {
        let namespace = self.namespace(app_id).await;
        let socket = namespace.get_connection(socket_id);

        let (left, remaining_connections, last_local) = {
            let _guard = self.lock_channel(app_id, channel).await;
            let left = namespace.unsubscribe(channel, socket_id);
            let subscription = socket
                .as_ref()
                .and_then(|socket| socket.remove_subscription(channel));
            let mut last_local = None;
            if let Some(member) = subscription.and_then(|sub| sub.presence_member().cloned())
                && namespace.presence.leave(channel, &member.user_id, socket_id)
            {
                last_local = Some(member);
            }
            (left, namespace.get_channel_socket_count(channel), last_local)
        };

        let member_removed = match last_local {
            Some(member) => self.announce_leave(app_id, channel, member).await?,
            None => None,
        };

        Ok(LeaveResponse {
            left,
            remaining_connections,
            member_removed,
        })
    }

    /// Broadcasts `member_removed` unless the user is still connected to the
    /// channel through another node.
    async fn announce_leave(
        &self,
        app_id: &str,
        channel: &str,
        member: PresenceMemberInfo,
    ) -> Result<Option<PresenceMemberInfo>> {
        if self
            .connection_manager
            .is_presence_member(app_id, channel, &member.user_id)
            .await?
        {
            debug!(
                "User {} left {} here but is still present on another node",
                member.user_id, channel
            );
            return Ok(None);
        }

        let member_removed = PusherMessage::member_removed(channel.to_string(), member.user_id.clone());
        self.connection_manager
            .send(channel, member_removed, None, app_id)
            .await?;
        Ok(Some(member))
    }

    /// Unsubscribes the socket from everything and forgets it. Never fails;
    /// cleanup problems are only logged.
    pub async fn disconnect(&self, socket_id: &SocketId, app_id: &str) {
        let namespace = self.namespace(app_id).await;
        let Some(socket) = namespace.remove_connection(socket_id) else {
            debug!("Disconnect of unknown socket {}", socket_id);
            return;
        };

        if socket.state() == ConnectionState::Connected {
            socket.set_state(ConnectionState::Unavailable);
        }

        for (channel, subscription) in socket.subscribed_channels() {
            let last_local = {
                let _guard = self.lock_channel(app_id, &channel).await;
                namespace.unsubscribe(&channel, socket_id);
                socket.remove_subscription(&channel);
                let mut last_local = None;
                if let Some(member) = subscription.presence_member()
                    && namespace.presence.leave(&channel, &member.user_id, socket_id)
                {
                    last_local = Some(member.clone());
                }
                last_local
            };
            let Some(member) = last_local else {
                continue;
            };

            if let Err(e) = self.announce_leave(app_id, &channel, member).await {
                error!(
                    "Presence cleanup of socket {} on {} failed: {}",
                    socket_id, channel, e
                );
            }
        }

        info!("Socket {} disconnected from app {}", socket_id, app_id);
    }

    pub async fn client_event(
        &self,
        socket_id: &SocketId,
        app_id: &str,
        request: &ClientEventRequest,
    ) -> Result<ClientEventOutcome> {
        let (_, socket) = self.socket(app_id, socket_id).await?;
        let channel = request.channel.as_str();

        if !request.event.starts_with(CLIENT_EVENT_PREFIX) {
            debug!("Ignoring non-client event {} from {}", request.event, socket_id);
            return Ok(ClientEventOutcome::Ignored);
        }
        let Some(subscription) = socket.subscription(channel) else {
            debug!(
                "Ignoring {} from {}: not subscribed to {}",
                request.event, socket_id, channel
            );
            return Ok(ClientEventOutcome::Ignored);
        };

        let policy = self.policy_for(app_id).await?;
        let admission = if ChannelType::from_name(channel).accepts_client_events() {
            policy.check_client_event(&request.event, &request.data)
        } else {
            Err(QuotaRejection::PublicChannel)
        };

        if let Err(rejection) = admission {
            debug!(
                "Client event {} from {} rejected: {}",
                request.event, socket_id, rejection
            );
            socket.send_message(&PusherMessage::error(
                rejection.status(),
                rejection.message(),
                Some(channel.to_string()),
            ))?;
            return Ok(ClientEventOutcome::Rejected(rejection));
        }

        let user_id = subscription.presence_member().map(|m| m.user_id.clone());
        let message = PusherMessage::client_event(
            request.event.clone(),
            channel.to_string(),
            request.data.clone(),
            user_id,
        );
        self.connection_manager
            .send(channel, message, Some(socket_id), app_id)
            .await?;

        Ok(ClientEventOutcome::Relayed)
    }
}
