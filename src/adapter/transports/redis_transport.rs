use crate::adapter::horizontal_adapter::{BroadcastMessage, RequestBody, ResponseBody};
use crate::adapter::horizontal_transport::{
    HorizontalTransport, TransportConfig, TransportHandlers,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tracing::{debug, error, warn};

pub const DEFAULT_PREFIX: &str = "presence-mesh";
const BROADCAST_SUFFIX: &str = "#broadcast";
const REQUESTS_SUFFIX: &str = "#requests";
const RESPONSES_SUFFIX: &str = "#responses";

/// Redis adapter configuration
#[derive(Debug, Clone)]
pub struct RedisAdapterConfig {
    pub url: String,
    pub prefix: String,
    pub request_timeout_ms: u64,
}

impl Default for RedisAdapterConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl TransportConfig for RedisAdapterConfig {
    fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Redis pub/sub transport.
///
/// Topics:
/// - `{prefix}:#requests` carries every request, all nodes subscribe;
/// - `{prefix}:#responses:{node}` carries answers to the node that asked;
/// - `{prefix}:#broadcast:{app}:{channel}` carries channel broadcasts,
///   received through a pattern subscription.
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    connection: redis::aio::ConnectionManager,
    prefix: String,
    request_channel: String,
    response_channel: String,
}

impl RedisTransport {
    fn broadcast_topic(&self, app_id: &str, channel: &str) -> String {
        format!("{}:{BROADCAST_SUFFIX}:{app_id}:{channel}", self.prefix)
    }

    fn response_topic(&self, node_id: &str) -> String {
        format!("{}:{RESPONSES_SUFFIX}:{node_id}", self.prefix)
    }
}

#[async_trait]
impl HorizontalTransport for RedisTransport {
    type Config = RedisAdapterConfig;

    async fn new(config: Self::Config, node_id: &str) -> Result<Self> {
        let client = redis::Client::open(&*config.url)
            .map_err(|e| Error::Redis(format!("Failed to create Redis client: {e}")))?;

        let connection_manager_config = redis::aio::ConnectionManagerConfig::new()
            .set_number_of_retries(5)
            .set_exponent_base(2)
            .set_factor(500)
            .set_max_delay(5000);

        let connection = client
            .get_connection_manager_with_config(connection_manager_config)
            .await
            .map_err(|e| Error::Redis(format!("Failed to connect to Redis: {e}")))?;

        let request_channel = format!("{}:{REQUESTS_SUFFIX}", config.prefix);
        let response_channel = format!("{}:{RESPONSES_SUFFIX}:{node_id}", config.prefix);

        Ok(Self {
            client,
            connection,
            prefix: config.prefix,
            request_channel,
            response_channel,
        })
    }

    async fn publish_broadcast(&self, message: &BroadcastMessage) -> Result<()> {
        let broadcast_json = serde_json::to_string(message)?;
        let topic = self.broadcast_topic(&message.app_id, &message.channel);

        // Retry with backoff while the connection manager recovers.
        let mut retry_delay = 100u64;
        const MAX_RETRIES: u32 = 3;
        const MAX_RETRY_DELAY: u64 = 1000;

        let mut attempt = 0;
        loop {
            let mut conn = self.connection.clone();
            match conn.publish::<_, _, i32>(&topic, &broadcast_json).await {
                Ok(_subscriber_count) => {
                    if attempt > 0 {
                        debug!("Broadcast succeeded on retry attempt {}", attempt);
                    }
                    return Ok(());
                }
                Err(e) if attempt >= MAX_RETRIES => {
                    return Err(Error::Redis(format!(
                        "Failed to publish broadcast after {} attempts: {}",
                        MAX_RETRIES + 1,
                        e
                    )));
                }
                Err(e) => {
                    warn!(
                        "Broadcast attempt {} failed: {}, retrying in {}ms",
                        attempt + 1,
                        e,
                        retry_delay
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(retry_delay)).await;
                    retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
                    attempt += 1;
                }
            }
        }
    }

    async fn publish_request(&self, request: &RequestBody) -> Result<()> {
        let request_json = serde_json::to_string(request)?;

        let mut conn = self.connection.clone();
        let subscriber_count: i32 = conn
            .publish(&self.request_channel, &request_json)
            .await
            .map_err(|e| Error::Redis(format!("Failed to publish request: {e}")))?;

        debug!(
            "Broadcasted request {} to {} subscribers",
            request.request_id, subscriber_count
        );
        Ok(())
    }

    async fn publish_response(&self, target_node_id: &str, response: &ResponseBody) -> Result<()> {
        let response_json = serde_json::to_string(response)?;

        let mut conn = self.connection.clone();
        let _: () = conn
            .publish(self.response_topic(target_node_id), response_json)
            .await
            .map_err(|e| Error::Redis(format!("Failed to publish response: {e}")))?;

        Ok(())
    }

    async fn start_listeners(&self, handlers: TransportHandlers) -> Result<()> {
        let sub_client = self.client.clone();
        let transport = self.clone();
        let broadcast_pattern = format!("{}:{BROADCAST_SUFFIX}:*", self.prefix);
        let request_channel = self.request_channel.clone();
        let response_channel = self.response_channel.clone();

        tokio::spawn(async move {
            let mut retry_delay = 500u64;
            const MAX_RETRY_DELAY: u64 = 10_000;

            loop {
                debug!("Attempting to establish pub/sub connection...");

                let mut pubsub = match sub_client.get_async_pubsub().await {
                    Ok(pubsub) => {
                        retry_delay = 500;
                        debug!("Pub/sub connection established successfully");
                        pubsub
                    }
                    Err(e) => {
                        error!(
                            "Failed to get pubsub connection: {}, retrying in {}ms",
                            e, retry_delay
                        );
                        tokio::time::sleep(tokio::time::Duration::from_millis(retry_delay)).await;
                        retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
                        continue;
                    }
                };

                let mut subscribed = pubsub
                    .subscribe(&[&request_channel, &response_channel])
                    .await;
                if subscribed.is_ok() {
                    subscribed = pubsub.psubscribe(&broadcast_pattern).await;
                }
                if let Err(e) = subscribed {
                    error!(
                        "Failed to subscribe to channels: {}, retrying in {}ms",
                        e, retry_delay
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(retry_delay)).await;
                    retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
                    continue;
                }

                debug!(
                    "Redis transport listening on {}, {} and pattern {}",
                    request_channel, response_channel, broadcast_pattern
                );

                let mut message_stream = pubsub.on_message();
                let mut connection_broken = false;

                while let Some(msg) = message_stream.next().await {
                    let channel = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Error getting message payload: {}", e);
                            connection_broken = true;
                            break;
                        }
                    };

                    let handlers = handlers.clone();
                    let transport = transport.clone();
                    let request_channel = request_channel.clone();
                    let response_channel = response_channel.clone();

                    tokio::spawn(async move {
                        if channel == request_channel {
                            let Ok(request) = serde_json::from_str::<RequestBody>(&payload) else {
                                warn!("Failed to parse request message: {}", payload);
                                return;
                            };
                            let requester = request.node_id.clone();
                            // Own requests come back as Err and are not answered.
                            if let Ok(response) = (handlers.on_request)(request).await
                                && let Err(e) =
                                    transport.publish_response(&requester, &response).await
                            {
                                warn!("Failed to answer node {}: {}", requester, e);
                            }
                        } else if channel == response_channel {
                            match serde_json::from_str::<ResponseBody>(&payload) {
                                Ok(response) => (handlers.on_response)(response).await,
                                Err(_) => warn!("Failed to parse response message: {}", payload),
                            }
                        } else {
                            match serde_json::from_str::<BroadcastMessage>(&payload) {
                                Ok(broadcast) => (handlers.on_broadcast)(broadcast).await,
                                Err(_) => warn!("Failed to parse broadcast on {}", channel),
                            }
                        }
                    });
                }

                if connection_broken {
                    warn!(
                        "Pub/sub connection broken, reconnecting in {}ms...",
                        retry_delay
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(retry_delay)).await;
                    retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
                } else {
                    warn!("Pub/sub message stream ended unexpectedly, reconnecting...");
                }
            }
        });

        Ok(())
    }

    async fn get_node_count(&self) -> Result<usize> {
        let mut conn = self.connection.clone();
        let values: Vec<redis::Value> = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(&self.request_channel)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Redis(format!("Failed to execute PUBSUB NUMSUB: {e}")))?;

        match values.get(1) {
            Some(redis::Value::Int(count)) => {
                let node_count = (*count).max(1) as usize;
                debug!("Detected {} nodes via PUBSUB NUMSUB", node_count);
                Ok(node_count)
            }
            other => {
                warn!("PUBSUB NUMSUB returned unexpected reply: {:?}", other);
                Ok(1)
            }
        }
    }

    async fn check_health(&self) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Redis(format!("Failed to acquire health check connection: {e}")))?;

        let response = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| Error::Redis(format!("Health check PING failed: {e}")))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(Error::Redis(format!(
                "PING returned unexpected response: {response}"
            )))
        }
    }
}
