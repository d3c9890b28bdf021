use std::sync::Arc;

use crate::adapter::local_adapter::LocalAdapter;
use crate::adapter::transports::RedisAdapterConfig;
use crate::adapter::{ConnectionManager, RedisAdapter};
use crate::error::Result;
use crate::options::{AdapterConfig, AdapterDriver};
use tracing::{info, warn};

pub struct AdapterFactory;

impl AdapterFactory {
    /// Builds the connection manager selected by `config.driver`. A broker
    /// that cannot be reached at startup leaves the node running alone on
    /// the local adapter.
    pub async fn create(config: &AdapterConfig) -> Result<Arc<dyn ConnectionManager + Send + Sync>> {
        info!(
            "Initializing ConnectionManager with driver: {:?}",
            config.driver
        );

        match config.driver {
            AdapterDriver::Redis => {
                let adapter_options = RedisAdapterConfig {
                    url: config.redis.url.clone(),
                    prefix: config.redis.prefix.clone(),
                    request_timeout_ms: config.requests_timeout,
                };
                match RedisAdapter::new(adapter_options).await {
                    Ok(adapter) => Ok(Arc::new(adapter)),
                    Err(e) => {
                        warn!(
                            "Failed to initialize Redis adapter: {}, falling back to local adapter",
                            e
                        );
                        Ok(Arc::new(LocalAdapter::new()))
                    }
                }
            }
            AdapterDriver::Local => {
                info!("Using local adapter.");
                Ok(Arc::new(LocalAdapter::new()))
            }
        }
    }
}
