use std::net::SocketAddr;
use std::sync::Arc;

use toolhost_core::{
    init_tracing, ExpirySweeper, RunnerConfig, SessionManager, SharedConfig, StdioConnector,
};
use toolhost_gateway::{bind_listener, router, AppState};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RunnerConfig::load();
    init_tracing(&config.log_level, config.log_format)?;
    config.validate()?;

    info!(target: "server", "{} starting on {}", config.app_name, config.platform);
    info!(target: "server", config = %config.summary(), "Current configuration");

    let shared = SharedConfig::new(config.clone());
    let connector = StdioConnector::new(config.protocol_version.clone())
        .with_client_name(config.app_name.clone());
    let manager = Arc::new(SessionManager::new(shared, Arc::new(connector)));

    let sweeper = if config.auto_cleanup {
        Some(ExpirySweeper::spawn(
            Arc::clone(&manager),
            config.cleanup_interval(),
        ))
    } else {
        info!(target: "server", "Automatic session cleanup disabled");
        None
    };

    let app = router(AppState::new(Arc::clone(&manager)), &config);

    let listener = bind_listener(&config).await?;
    let addr = listener.local_addr()?;
    info!(target: "server", url = %format!("http://{}", addr), "Server ready");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    info!(target: "server", "Shutting down");
    if let Some(sweeper) = sweeper {
        sweeper.stop().await;
    }
    manager.shutdown().await;
    info!(target: "server", "Shutdown complete");

    served.map_err(|e| {
        error!(target: "server", error = %e, "Server error");
        e.into()
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "server", error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
