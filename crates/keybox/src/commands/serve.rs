//! `keybox serve`.

use keybox_sandbox::{LifecycleManager, SandboxConfig};
use keybox_server::{create_router, AppState, ExecRelay};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Run the HTTP and WebSocket server until interrupted.
pub async fn run_server(config: SandboxConfig, address: SocketAddr) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    let relay = ExecRelay::for_manager(&manager)?;
    let app = create_router(AppState::new(manager, Arc::new(relay)));

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
