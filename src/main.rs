use std::sync::Arc;

use ride_dispatch::api;
use ride_dispatch::config::Config;
use ride_dispatch::engine::sweeper::run_expiry_sweeper;
use ride_dispatch::error::DispatchError;
use ride_dispatch::gateway::EventGateway;
use ride_dispatch::state::AppState;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DispatchError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let http_port = config.http_port;
    let shared_state = Arc::new(AppState::new(config));

    let gateway = EventGateway::subscribe(shared_state.clone());
    tokio::spawn(gateway.run());
    tokio::spawn(run_expiry_sweeper(shared_state.clone()));

    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| DispatchError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| DispatchError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
