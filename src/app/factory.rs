use crate::app::manager::AppManager;
use crate::app::memory_app_manager::MemoryAppManager;
use crate::error::Result;
use crate::options::AppManagerConfig;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppManagerFactory;

impl AppManagerFactory {
    pub async fn create(config: &AppManagerConfig) -> Result<Arc<dyn AppManager + Send + Sync>> {
        info!(
            "Initializing AppManager with {} configured app(s)",
            config.array.apps.len()
        );

        if config.array.apps.is_empty() {
            warn!("No apps configured; every connection will be rejected");
        }

        let manager = MemoryAppManager::with_apps(config.array.apps.iter().cloned());
        manager.init().await?;
        Ok(Arc::new(manager))
    }
}
