#![allow(dead_code)]

use presence_mesh::adapter::transports::{MemoryBus, MemoryTransportConfig};
use presence_mesh::adapter::{ConnectionManager, LocalAdapter, MemoryAdapter};
use presence_mesh::app::config::App;
use presence_mesh::app::memory_app_manager::MemoryAppManager;
use presence_mesh::channel::{ChannelManager, SubscriptionRequest};
use presence_mesh::error::Result;
use presence_mesh::options::{EventLimits, PresenceConfig};
use presence_mesh::protocol::messages::PusherMessage;
use presence_mesh::websocket::{OutboundFrame, SocketId, WebSocketRef};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

pub const APP_ID: &str = "app-1";
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(150);

pub fn test_app(id: &str) -> App {
    App {
        enable_client_messages: true,
        ..App::new(id, format!("{id}-key"), format!("{id}-secret"))
    }
}

/// One engine instance: its adapter plus the channel manager on top.
pub struct TestNode {
    pub adapter: Arc<MemoryAdapter>,
    pub manager: ChannelManager,
}

impl TestNode {
    pub fn node_id(&self) -> String {
        self.adapter.get_node_id()
    }

    pub async fn connect(&self, app_id: &str) -> Result<TestClient> {
        connect_client(&self.manager, app_id).await
    }
}

/// Starts `size` nodes sharing one in-memory bus and one app list.
pub async fn cluster(size: usize, apps: Vec<App>, request_timeout_ms: u64) -> (Arc<MemoryBus>, Vec<TestNode>) {
    let bus = MemoryBus::new();
    let mut nodes = Vec::with_capacity(size);

    for _ in 0..size {
        let mut config = MemoryTransportConfig::new(bus.clone());
        config.request_timeout_ms = request_timeout_ms;
        let adapter = Arc::new(
            MemoryAdapter::new(config)
                .await
                .expect("memory adapter never fails to start"),
        );
        adapter.init().await;

        let manager = ChannelManager::new(
            adapter.clone(),
            Arc::new(MemoryAppManager::with_apps(apps.clone())),
            PresenceConfig::default(),
            EventLimits::default(),
        );
        nodes.push(TestNode { adapter, manager });
    }

    (bus, nodes)
}

/// Single-node manager over the local adapter.
pub fn local_manager(apps: Vec<App>) -> ChannelManager {
    ChannelManager::new(
        Arc::new(LocalAdapter::new()),
        Arc::new(MemoryAppManager::with_apps(apps)),
        PresenceConfig::default(),
        EventLimits::default(),
    )
}

/// Client side of one connection.
pub struct TestClient {
    pub socket: WebSocketRef,
    pub rx: Receiver<OutboundFrame>,
}

impl TestClient {
    pub fn id(&self) -> SocketId {
        self.socket.socket_id
    }

    /// Waits for the next message with the given event name, skipping
    /// anything else.
    pub async fn expect_event(&mut self, event: &str) -> PusherMessage {
        let result = tokio::time::timeout(FRAME_TIMEOUT, async {
            loop {
                match self.rx.recv().await {
                    Some(OutboundFrame::Message(message))
                        if message.event.as_deref() == Some(event) =>
                    {
                        return Some(message);
                    }
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await;

        match result {
            Ok(Some(message)) => message,
            Ok(None) => panic!("socket {} closed while waiting for {event}", self.id()),
            Err(_) => panic!("socket {} never received {event}", self.id()),
        }
    }

    pub async fn expect_close(&mut self) -> u16 {
        let result = tokio::time::timeout(FRAME_TIMEOUT, async {
            while let Some(frame) = self.rx.recv().await {
                if let OutboundFrame::Close { code, .. } = frame {
                    return Some(code);
                }
            }
            None
        })
        .await;

        match result {
            Ok(Some(code)) => code,
            _ => panic!("socket {} was never closed", self.id()),
        }
    }

    /// Lets in-flight deliveries land, then returns every queued message.
    pub async fn settle(&mut self) -> Vec<PusherMessage> {
        tokio::time::sleep(QUIET_PERIOD).await;
        let mut messages = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let OutboundFrame::Message(message) = frame {
                messages.push(message);
            }
        }
        messages
    }

    pub async fn assert_no_event(&mut self, event: &str) {
        let messages = self.settle().await;
        assert!(
            messages.iter().all(|m| m.event.as_deref() != Some(event)),
            "socket {} unexpectedly received {event}: {messages:?}",
            self.id()
        );
    }
}

pub async fn connect_client(manager: &ChannelManager, app_id: &str) -> Result<TestClient> {
    let (socket, rx) = WebSocketRef::channel(SocketId::new(), app_id, 64);
    manager.connect(app_id, socket.clone()).await?;
    let mut client = TestClient { socket, rx };
    client
        .expect_event("pusher:connection_established")
        .await;
    Ok(client)
}

pub fn presence_request(channel: &str, user_id: &str) -> SubscriptionRequest {
    SubscriptionRequest::new(channel)
        .with_auth("app-1-key:signature")
        .with_channel_data(json!({
            "user_id": user_id,
            "user_info": { "name": user_id }
        }))
}

pub fn private_request(channel: &str) -> SubscriptionRequest {
    SubscriptionRequest::new(channel).with_auth("app-1-key:signature")
}

/// Decoded `data` of a frame.
pub fn data_of(message: &PusherMessage) -> Value {
    message
        .data
        .as_ref()
        .map(|data| data.parsed_value())
        .unwrap_or(Value::Null)
}
