use presence_mesh::adapter::ConnectionManager;
use presence_mesh::adapter::horizontal_adapter::{
    BroadcastMessage, PendingRequest, RequestType, ResponseBody,
};
use presence_mesh::adapter::horizontal_adapter_base::HorizontalAdapterBase;
use presence_mesh::error::Result;
use presence_mesh::websocket::{SocketId, WebSocketRef};
use std::sync::Arc;
use std::time::Duration;

use super::horizontal_adapter_helpers::{MockConfig, MockTransport};

type MockAdapter = HorizontalAdapterBase<MockTransport>;

#[tokio::test]
async fn test_concurrent_requests_do_not_mix_responses() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig {
        simulate_node_count: 4,
        response_delay_ms: 5,
        ..MockConfig::default()
    })
    .await?;
    adapter.start_listeners().await?;
    let adapter = Arc::new(adapter);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let adapter = adapter.clone();
        tasks.push(tokio::spawn(async move {
            let app_id = format!("app-{i}");
            adapter.get_sockets_count(&app_id).await
        }));
    }

    for task in tasks {
        let count = task.await.expect("task panicked")?;
        assert_eq!(count, 3);
    }
    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_late_response_is_discarded() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig::default()).await?;

    adapter.horizontal.process_response(ResponseBody {
        request_id: "unknown-request".to_string(),
        node_id: "mock-node-1".to_string(),
        app_id: "test-app".to_string(),
        sockets_count: 5,
        ..ResponseBody::default()
    });

    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_abandoned_requests_are_swept() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig {
        request_timeout_ms: 100,
        ..MockConfig::default()
    })
    .await?;
    adapter.start_listeners().await?;

    adapter
        .horizontal
        .pending_requests
        .insert("abandoned".to_string(), PendingRequest::new("test-app", 1));
    assert_eq!(adapter.horizontal.pending_requests.len(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_broadcast_is_dropped() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig::default()).await?;
    adapter.start_listeners().await?;

    let namespace = adapter.local_adapter.get_or_create_namespace("test-app");
    let (socket, mut rx) = WebSocketRef::channel(SocketId::new(), "test-app", 8);
    namespace.add_socket(socket.clone());
    namespace.subscribe("chat", &socket.socket_id);

    adapter
        .transport
        .simulate_incoming_broadcast(BroadcastMessage {
            node_id: "mock-node-1".to_string(),
            app_id: "test-app".to_string(),
            channel: "chat".to_string(),
            message: "{not json".to_string(),
            except_socket_id: None,
        })
        .await;

    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_unknown_app_answers_empty() -> Result<()> {
    let adapter = MockAdapter::new(MockConfig {
        simulate_node_count: 1,
        ..MockConfig::default()
    })
    .await?;
    adapter.start_listeners().await?;

    assert_eq!(adapter.get_sockets_count("missing-app").await?, 0);
    assert!(adapter.get_channel_members("missing-app", "presence-x").await?.is_empty());
    assert!(!adapter.is_presence_member("missing-app", "presence-x", "nobody").await?);

    let response = adapter
        .send_request("missing-app", RequestType::ChannelSockets, None, None)
        .await?;
    assert!(response.sockets.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_listeners_not_started_falls_back_to_timeout() -> Result<()> {
    // Without listeners no response reaches the pending entry.
    let adapter = MockAdapter::new(MockConfig {
        simulate_node_count: 2,
        request_timeout_ms: 100,
        ..MockConfig::default()
    })
    .await?;

    let count = adapter.get_sockets_count("test-app").await?;
    assert_eq!(count, 0);
    assert!(adapter.horizontal.pending_requests.is_empty());
    Ok(())
}
