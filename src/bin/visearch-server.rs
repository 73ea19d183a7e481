use std::sync::Arc;

use tracing::{error, info, warn};

use search_runtime::http::{router, AppState};
use search_runtime::{RuntimeConfig, SearchEngines};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("🚀 visearch server starting up...");
    info!("Version: {}", search_runtime::VERSION);

    let config = RuntimeConfig::from_env();
    let bind = format!("{}:{}", config.api.host, config.api.port);

    let engines = match SearchEngines::initialize(config).await {
        Ok(engines) => Arc::new(engines),
        Err(e) => {
            error!("❌ failed to initialize engines: {}", e);
            return Err(e.into());
        }
    };
    info!("✅ engines initialized");

    let queue = Arc::new(engines.start_event_queue());
    let app = router(AppState {
        engines: engines.clone(),
        queue: queue.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("🎯 listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("🛑 shutdown signal received");
        })
        .await?;

    info!("👋 visearch server shutdown complete");
    Ok(())
}
