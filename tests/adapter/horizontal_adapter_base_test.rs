use presence_mesh::adapter::ConnectionManager;
use presence_mesh::adapter::horizontal_adapter::{BroadcastMessage, RequestBody, RequestType};
use presence_mesh::adapter::horizontal_adapter_base::HorizontalAdapterBase;
use presence_mesh::adapter::horizontal_transport::TransportConfig;
use presence_mesh::channel::PresenceMemberInfo;
use presence_mesh::error::{Error, Result};
use presence_mesh::protocol::messages::PusherMessage;
use presence_mesh::websocket::{OutboundFrame, SocketId, WebSocketRef};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use super::horizontal_adapter_helpers::{MockConfig, MockTransport, mock_socket};

type MockAdapter = HorizontalAdapterBase<MockTransport>;

async fn started(config: MockConfig) -> Result<MockAdapter> {
    let adapter = MockAdapter::new(config).await?;
    adapter.start_listeners().await?;
    Ok(adapter)
}

/// Registers a local socket subscribed to `channel`.
fn local_subscriber(
    adapter: &MockAdapter,
    app_id: &str,
    channel: &str,
) -> (WebSocketRef, Receiver<OutboundFrame>) {
    let namespace = adapter.local_adapter.get_or_create_namespace(app_id);
    let (socket, rx) = WebSocketRef::channel(SocketId::new(), app_id, 16);
    namespace.add_socket(socket.clone());
    namespace.subscribe(channel, &socket.socket_id);
    (socket, rx)
}

fn drain(rx: &mut Receiver<OutboundFrame>) -> Vec<PusherMessage> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let OutboundFrame::Message(message) = frame {
            messages.push(message);
        }
    }
    messages
}

fn request_from(node_id: &str, request_type: RequestType, channel: Option<&str>) -> RequestBody {
    RequestBody {
        request_id: Uuid::new_v4().to_string(),
        node_id: node_id.to_string(),
        app_id: "test-app".to_string(),
        request_type,
        channel: channel.map(String::from),
        user_id: None,
    }
}

#[tokio::test]
async fn test_horizontal_adapter_base_new() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig::default()).await?;

    assert_eq!(adapter.config.prefix(), "test");
    assert_eq!(adapter.config.request_timeout_ms(), 1000);
    assert_eq!(adapter.get_node_id(), adapter.node_id);
    Ok(())
}

#[tokio::test]
async fn test_horizontal_adapter_base_new_failure() {
    let config = MockConfig {
        prefix: "fail_on_new".to_string(),
        simulate_failures: true,
        ..MockConfig::default()
    };

    assert!(MockAdapter::new(config).await.is_err());
}

#[tokio::test]
async fn test_send_request_unions_remote_and_local_sockets() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 3,
        response_delay_ms: 10,
        ..MockConfig::default()
    })
    .await?;
    let (local, _rx) = local_subscriber(&adapter, "test-app", "chat");

    let sockets = adapter.get_sockets("test-app").await?;
    assert_eq!(sockets.len(), 3);
    assert!(sockets.contains(&mock_socket(1)));
    assert!(sockets.contains(&mock_socket(2)));
    assert!(sockets.iter().any(|s| s.socket_id == local.socket_id && s.node_id == adapter.node_id));

    assert_eq!(adapter.get_sockets_count("test-app").await?, 3);
    assert_eq!(adapter.transport.get_published_requests().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_single_node_answers_locally() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 1,
        ..MockConfig::default()
    })
    .await?;
    local_subscriber(&adapter, "test-app", "chat");

    assert_eq!(adapter.get_channel_sockets("test-app", "chat").await?.len(), 1);
    assert!(adapter.transport.get_published_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeout_returns_partial_union() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 3,
        responding_nodes: Some(1),
        request_timeout_ms: 200,
        ..MockConfig::default()
    })
    .await?;

    let start = Instant::now();
    let response = adapter
        .send_request("test-app", RequestType::Sockets, None, None)
        .await?;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(150), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "returned after {elapsed:?}");
    assert_eq!(response.sockets, vec![mock_socket(1)]);
    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_member_exists_returns_on_first_positive() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 3,
        responding_nodes: Some(1),
        request_timeout_ms: 3000,
        ..MockConfig::default()
    })
    .await?;

    let start = Instant::now();
    let exists = adapter
        .is_presence_member("test-app", "presence-room", "remote-user")
        .await?;

    assert!(exists);
    assert!(start.elapsed() < Duration::from_millis(1500));
    Ok(())
}

#[tokio::test]
async fn test_member_exists_locally_skips_the_broker() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 3,
        ..MockConfig::default()
    })
    .await?;
    let (socket, _rx) = local_subscriber(&adapter, "test-app", "presence-room");
    let member = PresenceMemberInfo {
        user_id: "alice".to_string(),
        user_info: None,
    };
    adapter
        .local_adapter
        .get_or_create_namespace("test-app")
        .presence
        .join("presence-room", &member, socket.socket_id);

    assert!(adapter.is_presence_member("test-app", "presence-room", "alice").await?);
    assert!(adapter.transport.get_published_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_member_count_deduplicates_users_across_nodes() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_node_count: 3,
        ..MockConfig::default()
    })
    .await?;
    let (socket, _rx) = local_subscriber(&adapter, "test-app", "presence-room");
    // mock-node-1 also reports user-1.
    let member = PresenceMemberInfo {
        user_id: "user-1".to_string(),
        user_info: Some(json!({ "node": "local" })),
    };
    adapter
        .local_adapter
        .get_or_create_namespace("test-app")
        .presence
        .join("presence-room", &member, socket.socket_id);

    let members = adapter.get_channel_members("test-app", "presence-room").await?;
    assert_eq!(members.len(), 2);
    assert!(members.contains_key("user-1"));
    assert!(members.contains_key("user-2"));
    assert_eq!(adapter.get_member_count("test-app", "presence-room").await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_broker_outage_degrades_to_local_results() -> Result<()> {
    let adapter = started(MockConfig {
        prefix: "fail_node_count".to_string(),
        simulate_failures: true,
        simulate_node_count: 3,
        ..MockConfig::default()
    })
    .await?;
    local_subscriber(&adapter, "test-app", "chat");

    assert_eq!(adapter.get_sockets_count("test-app").await?, 1);
    assert!(adapter.transport.get_published_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_request_publish_failure_degrades_to_local_results() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_failures: true,
        simulate_node_count: 3,
        ..MockConfig::default()
    })
    .await?;
    local_subscriber(&adapter, "fail_request", "chat");

    let response = adapter
        .send_request("fail_request", RequestType::SocketsCount, None, None)
        .await?;
    assert_eq!(response.sockets_count, 1);
    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_send_delivers_locally_once_and_publishes() -> Result<()> {
    let adapter = started(MockConfig::default()).await?;
    let (sender, mut sender_rx) = local_subscriber(&adapter, "test-app", "private-chat");
    let (_other, mut other_rx) = local_subscriber(&adapter, "test-app", "private-chat");

    let message = PusherMessage::client_event(
        "client-typing".to_string(),
        "private-chat".to_string(),
        json!({ "typing": true }),
        None,
    );
    adapter
        .send("private-chat", message, Some(&sender.socket_id), "test-app")
        .await?;

    // Let the echoed broadcast come back and be discarded.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(drain(&mut sender_rx).is_empty());
    let received = drain(&mut other_rx);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event.as_deref(), Some("client-typing"));

    let broadcasts = adapter.transport.get_published_broadcasts().await;
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].node_id, adapter.node_id);
    assert_eq!(
        broadcasts[0].except_socket_id.as_deref(),
        Some(sender.socket_id.to_string().as_str())
    );
    Ok(())
}

#[tokio::test]
async fn test_broadcast_publish_failure_is_not_surfaced() -> Result<()> {
    let adapter = started(MockConfig {
        simulate_failures: true,
        ..MockConfig::default()
    })
    .await?;
    let (_socket, mut rx) = local_subscriber(&adapter, "test-app", "chat");

    let message = PusherMessage::client_event(
        "client-note".to_string(),
        "chat".to_string(),
        json!("simulate_error"),
        None,
    );
    adapter.send("chat", message, None, "test-app").await?;

    assert_eq!(drain(&mut rx).len(), 1);
    assert!(adapter.transport.get_published_broadcasts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_remote_broadcast_reaches_local_subscribers() -> Result<()> {
    let adapter = started(MockConfig::default()).await?;
    let (excluded, mut excluded_rx) = local_subscriber(&adapter, "test-app", "presence-room");
    let (_member, mut member_rx) = local_subscriber(&adapter, "test-app", "presence-room");

    let message = PusherMessage::member_added("presence-room".to_string(), "bob".to_string(), None);
    adapter
        .transport
        .simulate_incoming_broadcast(BroadcastMessage {
            node_id: "mock-node-1".to_string(),
            app_id: "test-app".to_string(),
            channel: "presence-room".to_string(),
            message: serde_json::to_string(&message)?,
            except_socket_id: Some(excluded.socket_id.to_string()),
        })
        .await;

    assert!(drain(&mut excluded_rx).is_empty());
    let received = drain(&mut member_rx);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, message.event);
    assert_eq!(received[0].channel.as_deref(), Some("presence-room"));
    Ok(())
}

#[tokio::test]
async fn test_incoming_request_is_answered_to_the_requester() -> Result<()> {
    let adapter = started(MockConfig::default()).await?;
    local_subscriber(&adapter, "test-app", "chat");

    let response = adapter
        .transport
        .simulate_incoming_request(request_from("mock-node-7", RequestType::ChannelSockets, Some("chat")))
        .await?;
    assert_eq!(response.node_id, adapter.node_id);
    assert_eq!(response.sockets.len(), 1);

    let published = adapter.transport.get_published_responses().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "mock-node-7");

    let own = adapter
        .transport
        .simulate_incoming_request(request_from(&adapter.node_id, RequestType::Sockets, None))
        .await;
    assert!(matches!(own, Err(Error::OwnRequestIgnored)));
    Ok(())
}

#[tokio::test]
async fn test_check_health_follows_transport() -> Result<()> {
    let adapter = started(MockConfig::default()).await?;
    adapter.check_health().await?;

    adapter.transport.set_health_status(false).await;
    assert!(adapter.check_health().await.is_err());
    Ok(())
}
