use async_trait::async_trait;
use presence_mesh::adapter::SocketDescriptor;
use presence_mesh::adapter::horizontal_adapter::{BroadcastMessage, RequestBody, ResponseBody, RequestType};
use presence_mesh::adapter::horizontal_transport::{
    HorizontalTransport, TransportConfig, TransportHandlers,
};
use presence_mesh::channel::PresenceMemberInfo;
use presence_mesh::error::{Error, Result};
use presence_mesh::websocket::SocketId;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock configuration for testing
#[derive(Clone)]
pub struct MockConfig {
    pub prefix: String,
    pub request_timeout_ms: u64,
    /// Total nodes reported by `get_node_count`, this one included
    pub simulate_node_count: usize,
    /// How many of the simulated remote nodes actually answer
    pub responding_nodes: Option<usize>,
    pub simulate_failures: bool,
    pub response_delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            prefix: "test".to_string(),
            request_timeout_ms: 1000,
            simulate_node_count: 2,
            responding_nodes: None,
            simulate_failures: false,
            response_delay_ms: 0,
        }
    }
}

impl TransportConfig for MockConfig {
    fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Socket every simulated node `idx` reports.
pub fn mock_socket(node_idx: usize) -> SocketDescriptor {
    SocketDescriptor {
        node_id: format!("mock-node-{node_idx}"),
        socket_id: SocketId {
            high: node_idx as u64,
            low: 1,
        },
    }
}

/// Mock transport for testing HorizontalAdapterBase. Remote nodes are
/// simulated: each answers a request with one socket and one presence member
/// `user-{idx}`, and knows the user `remote-user`.
#[derive(Clone)]
pub struct MockTransport {
    config: MockConfig,
    handlers: Arc<Mutex<Option<TransportHandlers>>>,
    published_broadcasts: Arc<Mutex<Vec<BroadcastMessage>>>,
    published_requests: Arc<Mutex<Vec<RequestBody>>>,
    published_responses: Arc<Mutex<Vec<(String, ResponseBody)>>>,
    health_status: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(Mutex::new(None)),
            published_broadcasts: Arc::new(Mutex::new(Vec::new())),
            published_requests: Arc::new(Mutex::new(Vec::new())),
            published_responses: Arc::new(Mutex::new(Vec::new())),
            health_status: Arc::new(Mutex::new(true)),
        }
    }

    pub async fn get_published_broadcasts(&self) -> Vec<BroadcastMessage> {
        self.published_broadcasts.lock().await.clone()
    }

    pub async fn get_published_requests(&self) -> Vec<RequestBody> {
        self.published_requests.lock().await.clone()
    }

    pub async fn get_published_responses(&self) -> Vec<(String, ResponseBody)> {
        self.published_responses.lock().await.clone()
    }

    pub async fn set_health_status(&self, healthy: bool) {
        *self.health_status.lock().await = healthy;
    }

    /// Delivers a request as if another node had published it and returns
    /// the answer this node would publish back.
    pub async fn simulate_incoming_request(&self, request: RequestBody) -> Result<ResponseBody> {
        let on_request = {
            let handlers = self.handlers.lock().await;
            handlers
                .as_ref()
                .map(|h| h.on_request.clone())
                .ok_or_else(|| Error::Internal("listeners not started".to_string()))?
        };
        let requester = request.node_id.clone();
        let response = on_request(request).await?;
        self.publish_response(&requester, &response).await?;
        Ok(response)
    }

    pub async fn simulate_incoming_broadcast(&self, broadcast: BroadcastMessage) {
        let on_broadcast = {
            let handlers = self.handlers.lock().await;
            handlers.as_ref().map(|h| h.on_broadcast.clone())
        };
        if let Some(on_broadcast) = on_broadcast {
            on_broadcast(broadcast).await;
        }
    }

    fn remote_response(request: &RequestBody, node_idx: usize) -> ResponseBody {
        let user_id = format!("user-{node_idx}");
        let mut members = HashMap::new();
        members.insert(
            user_id.clone(),
            PresenceMemberInfo {
                user_id,
                user_info: Some(json!({ "node": node_idx })),
            },
        );

        ResponseBody {
            request_id: request.request_id.clone(),
            node_id: format!("mock-node-{node_idx}"),
            app_id: request.app_id.clone(),
            sockets: vec![mock_socket(node_idx)],
            members,
            sockets_count: 1,
            exists: request.request_type == RequestType::MemberExists
                && request.user_id.as_deref() == Some("remote-user"),
        }
    }
}

#[async_trait]
impl HorizontalTransport for MockTransport {
    type Config = MockConfig;

    async fn new(config: Self::Config, _node_id: &str) -> Result<Self> {
        if config.simulate_failures && config.prefix == "fail_on_new" {
            return Err(Error::Internal("Simulated connection failure".to_string()));
        }
        Ok(Self::new(config))
    }

    async fn publish_broadcast(&self, message: &BroadcastMessage) -> Result<()> {
        if self.config.simulate_failures && message.message.contains("simulate_error") {
            return Err(Error::Internal("Simulated broadcast failure".to_string()));
        }

        self.published_broadcasts.lock().await.push(message.clone());

        // Brokers echo a publish back to the publisher.
        let on_broadcast = {
            let handlers = self.handlers.lock().await;
            handlers.as_ref().map(|h| h.on_broadcast.clone())
        };
        if let Some(on_broadcast) = on_broadcast {
            let message = message.clone();
            tokio::spawn(async move { on_broadcast(message).await });
        }

        Ok(())
    }

    async fn publish_request(&self, request: &RequestBody) -> Result<()> {
        if self.config.simulate_failures && request.app_id == "fail_request" {
            return Err(Error::Internal("Simulated request failure".to_string()));
        }

        self.published_requests.lock().await.push(request.clone());

        let on_response = {
            let handlers = self.handlers.lock().await;
            handlers.as_ref().map(|h| h.on_response.clone())
        };
        let Some(on_response) = on_response else {
            return Ok(());
        };

        let remote_nodes = self.config.simulate_node_count.saturating_sub(1);
        let responding = self.config.responding_nodes.unwrap_or(remote_nodes);
        let response_delay = self.config.response_delay_ms;

        for node_idx in 1..=responding.min(remote_nodes) {
            let on_response = on_response.clone();
            let response = Self::remote_response(request, node_idx);
            tokio::spawn(async move {
                if response_delay > 0 {
                    tokio::time::sleep(Duration::from_millis(response_delay)).await;
                }
                on_response(response).await;
            });
        }

        Ok(())
    }

    async fn publish_response(&self, target_node_id: &str, response: &ResponseBody) -> Result<()> {
        self.published_responses
            .lock()
            .await
            .push((target_node_id.to_string(), response.clone()));
        Ok(())
    }

    async fn start_listeners(&self, handlers: TransportHandlers) -> Result<()> {
        *self.handlers.lock().await = Some(handlers);
        Ok(())
    }

    async fn get_node_count(&self) -> Result<usize> {
        if self.config.simulate_failures && self.config.prefix == "fail_node_count" {
            return Err(Error::Internal("Simulated broker outage".to_string()));
        }
        Ok(self.config.simulate_node_count)
    }

    async fn check_health(&self) -> Result<()> {
        if *self.health_status.lock().await {
            Ok(())
        } else {
            Err(Error::Internal("Mock transport unhealthy".to_string()))
        }
    }
}
