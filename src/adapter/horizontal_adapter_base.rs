use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::connection_manager::{ConnectionManager, SocketDescriptor};
use crate::adapter::horizontal_adapter::{
    BroadcastMessage, HorizontalAdapter, PendingRequest, RequestBody, RequestType, ResponseBody,
};
use crate::adapter::horizontal_transport::{
    HorizontalTransport, TransportConfig, TransportHandlers,
};
use crate::adapter::local_adapter::LocalAdapter;
use crate::channel::PresenceMemberInfo;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::protocol::messages::PusherMessage;
use crate::websocket::SocketId;
use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Generic base adapter that handles all common horizontal scaling logic
pub struct HorizontalAdapterBase<T: HorizontalTransport> {
    pub horizontal: Arc<HorizontalAdapter>,
    pub local_adapter: Arc<LocalAdapter>,
    pub transport: T,
    pub config: T::Config,
    pub node_id: String,
}

impl<T: HorizontalTransport + 'static> HorizontalAdapterBase<T>
where
    T::Config: TransportConfig,
{
    pub async fn new(config: T::Config) -> Result<Self> {
        let node_id = Uuid::new_v4().to_string();
        let horizontal = Arc::new(HorizontalAdapter::new(
            node_id.clone(),
            config.request_timeout_ms(),
        ));
        let local_adapter = horizontal.local_adapter.clone();
        let transport = T::new(config.clone(), &node_id).await?;

        Ok(Self {
            horizontal,
            local_adapter,
            transport,
            config,
            node_id,
        })
    }

    /// Asks every node and merges the answers with this node's own.
    ///
    /// Waits until all other nodes answered or the request timeout passed,
    /// whichever comes first; a timeout yields the partial result. A
    /// positive `MemberExists` answer returns right away. When the broker
    /// cannot be reached the local answer is returned.
    pub async fn send_request(
        &self,
        app_id: &str,
        request_type: RequestType,
        channel: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<ResponseBody> {
        let request = RequestBody {
            request_id: Uuid::new_v4().to_string(),
            node_id: self.node_id.clone(),
            app_id: app_id.to_string(),
            request_type,
            channel: channel.map(String::from),
            user_id: user_id.map(String::from),
        };
        let request_id = request.request_id.clone();

        let local_response = self.horizontal.answer(&request);
        if request_type == RequestType::MemberExists && local_response.exists {
            return Ok(local_response);
        }

        let node_count = match self.transport.get_node_count().await {
            Ok(count) => count,
            Err(e) => {
                error!(
                    "Failed to count cluster nodes, answering {:?} locally: {}",
                    request_type, e
                );
                return Ok(local_response);
            }
        };

        let max_expected_responses = node_count.saturating_sub(1);
        if max_expected_responses == 0 {
            return Ok(local_response);
        }

        let pending = PendingRequest::new(app_id, max_expected_responses);
        let notify = pending.notify.clone();
        self.horizontal
            .pending_requests
            .insert(request_id.clone(), pending);

        if let Err(e) = self.transport.publish_request(&request).await {
            self.horizontal.pending_requests.remove(&request_id);
            error!(
                "Failed to publish request {}, answering {:?} locally: {}",
                request_id, request_type, e
            );
            return Ok(local_response);
        }

        let start = Instant::now();
        let deadline = start + Duration::from_millis(self.config.request_timeout_ms());

        loop {
            let (received, positive) = match self.horizontal.pending_requests.get(&request_id) {
                Some(pending) => (
                    pending.responses.len(),
                    pending.responses.iter().any(|r| r.exists),
                ),
                None => {
                    warn!("Request {} was removed while waiting", request_id);
                    break;
                }
            };

            if received >= max_expected_responses {
                debug!(
                    "Request {} completed with {}/{} responses in {}ms",
                    request_id,
                    received,
                    max_expected_responses,
                    start.elapsed().as_millis()
                );
                break;
            }

            if request_type == RequestType::MemberExists && positive {
                debug!(
                    "Request {} early return with {}/{} responses (found positive result)",
                    request_id, received, max_expected_responses
                );
                break;
            }

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline.into()) => {
                    warn!(
                        "Request {} timed out after {}ms with {}/{} responses",
                        request_id,
                        start.elapsed().as_millis(),
                        received,
                        max_expected_responses
                    );
                    break;
                }
            }
        }

        let mut responses = self
            .horizontal
            .pending_requests
            .remove(&request_id)
            .map(|(_, pending)| pending.responses)
            .unwrap_or_default();
        responses.push(local_response);

        Ok(self.horizontal.aggregate_responses(
            request_id,
            app_id.to_string(),
            request_type,
            responses,
        ))
    }

    pub async fn start_listeners(&self) -> Result<()> {
        self.horizontal.start_request_cleanup();

        let broadcast_horizontal = self.horizontal.clone();
        let request_horizontal = self.horizontal.clone();
        let response_horizontal = self.horizontal.clone();

        let handlers = TransportHandlers {
            on_broadcast: Arc::new(move |broadcast: BroadcastMessage| {
                let horizontal = broadcast_horizontal.clone();
                Box::pin(async move {
                    if broadcast.node_id == horizontal.node_id {
                        return;
                    }

                    let message = match serde_json::from_str::<PusherMessage>(&broadcast.message)
                    {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(
                                "Dropping malformed broadcast from node {}: {}",
                                broadcast.node_id, e
                            );
                            return;
                        }
                    };

                    let except_id = broadcast
                        .except_socket_id
                        .as_deref()
                        .and_then(|id| SocketId::from_string(id).ok());

                    let delivered = horizontal.local_adapter.deliver(
                        &broadcast.app_id,
                        &broadcast.channel,
                        &message,
                        except_id.as_ref(),
                    );
                    debug!(
                        "Broadcast from node {} on channel {} reached {} local socket(s)",
                        broadcast.node_id, broadcast.channel, delivered
                    );
                })
            }),
            on_request: Arc::new(move |request: RequestBody| {
                let horizontal = request_horizontal.clone();
                Box::pin(async move { horizontal.process_request(&request) })
            }),
            on_response: Arc::new(move |response: ResponseBody| {
                let horizontal = response_horizontal.clone();
                Box::pin(async move {
                    if response.node_id == horizontal.node_id {
                        return;
                    }
                    horizontal.process_response(response);
                })
            }),
        };

        self.transport.start_listeners(handlers).await
    }
}

#[async_trait]
impl<T: HorizontalTransport + 'static> ConnectionManager for HorizontalAdapterBase<T>
where
    T::Config: TransportConfig,
{
    async fn init(&self) {
        self.local_adapter.init().await;

        if let Err(e) = self.start_listeners().await {
            error!("Failed to start transport listeners: {}", e);
        }
    }

    async fn get_namespace(&self, app_id: &str) -> Arc<Namespace> {
        self.local_adapter.get_namespace(app_id).await
    }

    async fn send_message(
        &self,
        app_id: &str,
        socket_id: &SocketId,
        message: PusherMessage,
    ) -> Result<()> {
        self.local_adapter
            .send_message(app_id, socket_id, message)
            .await
    }

    async fn send(
        &self,
        channel: &str,
        message: PusherMessage,
        except: Option<&SocketId>,
        app_id: &str,
    ) -> Result<()> {
        // Local subscribers first, then every other node.
        self.local_adapter.deliver(app_id, channel, &message, except);

        let broadcast = BroadcastMessage {
            node_id: self.node_id.clone(),
            app_id: app_id.to_string(),
            channel: channel.to_string(),
            message: serde_json::to_string(&message)?,
            except_socket_id: except.map(|id| id.to_string()),
        };

        if let Err(e) = self.transport.publish_broadcast(&broadcast).await {
            error!(
                "Failed to publish broadcast on channel {} to other nodes: {}",
                channel, e
            );
        }

        Ok(())
    }

    async fn get_sockets(&self, app_id: &str) -> Result<HashSet<SocketDescriptor>> {
        let response = self
            .send_request(app_id, RequestType::Sockets, None, None)
            .await?;
        Ok(response.sockets.into_iter().collect())
    }

    async fn get_sockets_count(&self, app_id: &str) -> Result<usize> {
        let response = self
            .send_request(app_id, RequestType::SocketsCount, None, None)
            .await?;
        Ok(response.sockets_count)
    }

    async fn get_channel_sockets(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashSet<SocketDescriptor>> {
        let response = self
            .send_request(app_id, RequestType::ChannelSockets, Some(channel), None)
            .await?;
        Ok(response.sockets.into_iter().collect())
    }

    async fn get_channel_members(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashMap<String, PresenceMemberInfo>> {
        let response = self
            .send_request(app_id, RequestType::ChannelMembers, Some(channel), None)
            .await?;
        Ok(response.members)
    }

    async fn is_presence_member(
        &self,
        app_id: &str,
        channel: &str,
        user_id: &str,
    ) -> Result<bool> {
        let response = self
            .send_request(
                app_id,
                RequestType::MemberExists,
                Some(channel),
                Some(user_id),
            )
            .await?;
        Ok(response.exists)
    }

    async fn check_health(&self) -> Result<()> {
        self.transport
            .check_health()
            .await
            .map_err(|e| Error::HorizontalAdapter(format!("transport unhealthy: {e}")))
    }

    fn get_node_id(&self) -> String {
        self.node_id.clone()
    }
}
