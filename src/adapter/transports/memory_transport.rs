use std::sync::Arc;

use crate::adapter::horizontal_adapter::{BroadcastMessage, RequestBody, ResponseBody};
use crate::adapter::horizontal_transport::{
    HorizontalTransport, TransportConfig, TransportHandlers,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

struct BusNode {
    handlers: Option<TransportHandlers>,
    reachable: bool,
}

/// In-process broker shared by every node of a simulated cluster.
///
/// A node joins when its listeners start. Marking a node unreachable cuts
/// it off in both directions while it still counts as subscribed, which is
/// what a network partition looks like from the broker's side.
#[derive(Default)]
pub struct MemoryBus {
    nodes: DashMap<String, BusNode>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, node_id: &str, reachable: bool) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.reachable = reachable;
        }
    }

    pub fn is_reachable(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|node| node.reachable)
    }

    pub fn subscriber_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.handlers.is_some()).count()
    }

    fn register(&self, node_id: &str, handlers: TransportHandlers) {
        self.nodes
            .entry(node_id.to_string())
            .and_modify(|node| node.handlers = Some(handlers.clone()))
            .or_insert(BusNode {
                handlers: Some(handlers),
                reachable: true,
            });
    }

    fn reachable_handlers(&self) -> Vec<TransportHandlers> {
        self.nodes
            .iter()
            .filter(|node| node.reachable)
            .filter_map(|node| node.handlers.clone())
            .collect()
    }

    fn handlers_of(&self, node_id: &str) -> Option<TransportHandlers> {
        self.nodes
            .get(node_id)
            .filter(|node| node.reachable)
            .and_then(|node| node.handlers.clone())
    }
}

#[derive(Clone)]
pub struct MemoryTransportConfig {
    pub bus: Arc<MemoryBus>,
    pub prefix: String,
    pub request_timeout_ms: u64,
}

impl MemoryTransportConfig {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            bus,
            prefix: "memory".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl TransportConfig for MemoryTransportConfig {
    fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Transport over a [`MemoryBus`]. Deliveries run on spawned tasks, so
/// ordering across nodes is not guaranteed, same as with a real broker.
#[derive(Clone)]
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
    node_id: String,
}

impl MemoryTransport {
    fn ensure_reachable(&self) -> Result<()> {
        if self.bus.is_reachable(&self.node_id) {
            Ok(())
        } else {
            Err(Error::HorizontalAdapter(format!(
                "node {} cannot reach the bus",
                self.node_id
            )))
        }
    }
}

#[async_trait]
impl HorizontalTransport for MemoryTransport {
    type Config = MemoryTransportConfig;

    async fn new(config: Self::Config, node_id: &str) -> Result<Self> {
        Ok(Self {
            bus: config.bus,
            node_id: node_id.to_string(),
        })
    }

    async fn publish_broadcast(&self, message: &BroadcastMessage) -> Result<()> {
        self.ensure_reachable()?;

        for handlers in self.bus.reachable_handlers() {
            let message = message.clone();
            tokio::spawn(async move { (handlers.on_broadcast)(message).await });
        }
        Ok(())
    }

    async fn publish_request(&self, request: &RequestBody) -> Result<()> {
        self.ensure_reachable()?;

        for handlers in self.bus.reachable_handlers() {
            let request = request.clone();
            let transport = self.clone();
            tokio::spawn(async move {
                let requester = request.node_id.clone();
                if let Ok(response) = (handlers.on_request)(request).await
                    && let Err(e) = transport.publish_response(&requester, &response).await
                {
                    debug!("Response to node {} dropped: {}", requester, e);
                }
            });
        }
        Ok(())
    }

    async fn publish_response(&self, target_node_id: &str, response: &ResponseBody) -> Result<()> {
        match self.bus.handlers_of(target_node_id) {
            Some(handlers) => {
                (handlers.on_response)(response.clone()).await;
                Ok(())
            }
            None => Err(Error::HorizontalAdapter(format!(
                "node {target_node_id} is not reachable"
            ))),
        }
    }

    async fn start_listeners(&self, handlers: TransportHandlers) -> Result<()> {
        self.bus.register(&self.node_id, handlers);
        debug!("Node {} joined the in-memory bus", self.node_id);
        Ok(())
    }

    async fn get_node_count(&self) -> Result<usize> {
        self.ensure_reachable()?;
        Ok(self.bus.subscriber_count().max(1))
    }

    async fn check_health(&self) -> Result<()> {
        self.ensure_reachable().inspect_err(|e| warn!("{}", e))
    }
}
