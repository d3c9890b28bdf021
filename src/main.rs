use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use presence_mesh::adapter::factory::AdapterFactory;
use presence_mesh::app::factory::AppManagerFactory;
use presence_mesh::channel::ChannelManager;
use presence_mesh::error::Result;
use presence_mesh::options::ServerOptions;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, util::SubscriberInitExt};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Pusher-compatible presence engine node", long_about = None)]
struct Args {
    /// Path to a JSON options file
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

fn load_options(args: &Args) -> Result<ServerOptions> {
    let mut options = match &args.config {
        Some(path) => {
            // Logging is not up yet.
            println!("[PRE-LOG] Loading configuration from file: {}", path.display());
            ServerOptions::load(path)?
        }
        None => {
            println!("[PRE-LOG] No configuration file given, using defaults and environment variables.");
            ServerOptions::default()
        }
    };
    options.apply_env_overrides();
    Ok(options)
}

fn init_logging(debug: bool) {
    let default_log_directive = if debug {
        "info,presence_mesh=debug".to_string()
    } else {
        std::env::var("MESH_LOG_PROD").unwrap_or_else(|_| "info".to_string())
    };

    // RUST_LOG takes precedence over the defaults above.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directive));

    let subscriber_builder = fmt::Subscriber::builder().with_env_filter(env_filter);

    if debug {
        subscriber_builder
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .finish()
            .init();
    } else {
        subscriber_builder.with_target(false).finish().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let options = load_options(&args)?;

    init_logging(options.debug);
    info!("Logging initialized. Debug mode: {}", options.debug);

    let app_manager = AppManagerFactory::create(&options.app_manager).await?;
    let adapter = AdapterFactory::create(&options.adapter).await?;
    adapter.init().await;

    let channel_manager = Arc::new(
        ChannelManager::new(
            adapter.clone(),
            app_manager,
            options.presence.clone(),
            options.event_limits.clone(),
        )
        .with_activity_timeout(options.activity_timeout)
        .with_buffer_capacity(options.websocket.buffer_capacity),
    );

    info!(
        "Node {} ready (adapter: {:?}, outbound buffer: {} frames)",
        adapter.get_node_id(),
        options.adapter.driver,
        options.websocket.buffer_capacity
    );

    let health_adapter = channel_manager.connection_manager().clone();
    let health_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = health_adapter.check_health().await {
                warn!("Adapter health check failed, running degraded: {}", e);
            }
        }
    });

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    health_task.abort();
    info!("Node {} shut down", adapter.get_node_id());
    Ok(())
}
