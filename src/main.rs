use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use ethereum_data_api::upstream::RpcUpstream;
use ethereum_data_api::{
    AppState, Config, UpstreamClient, build_router, metrics, telemetry, utils,
};

/// Budget for the block-number query issued before serving.
const STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Logging depends on configuration, so config errors go to stderr
    let config = Config::from_env().map_err(|e| {
        eprintln!("Configuration error: {e}");
        exitcode::CONFIG
    })?;

    telemetry::init_tracing(&config.log_level, config.log_format, &config.log_output).map_err(
        |e| {
            eprintln!("Logging setup failed: {e}");
            exitcode::CONFIG
        },
    )?;
    telemetry::install_panic_hook();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        "Starting Ethereum Data API"
    );
    info!(
        host = %config.host,
        port = config.port,
        rate_limit = config.rate_limit,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        auth_enabled = config.auth_enabled,
        "Configuration loaded"
    );
    if config.ethereum_retry_attempts > 0 {
        warn!(
            attempts = config.ethereum_retry_attempts,
            delay_ms = config.ethereum_retry_delay.as_millis() as u64,
            "ETHEREUM_RETRY_* are accepted but upstream calls are never retried"
        );
    }

    // Exporter failures are logged, not fatal
    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Upstream node
    let upstream = RpcUpstream::connect(&config.ethereum_rpc_url).map_err(|e| {
        error!("Invalid Ethereum RPC endpoint: {e}");
        exitcode::CONFIG
    })?;
    check_upstream(&upstream).await?;

    // Build application state and router
    let state = AppState::new(config.clone(), Arc::new(upstream));
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health                    - Health check");
    info!("  GET  /api/ethereum/{{address}}    - Gas price, block number and balance");
    if config.is_debug() {
        info!("  GET  /debug/ping                - Debug ping");
    }

    // Peer addresses feed client identity for rate limiting and auth throttling
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let signal = utils::shutdown_signal().await;
        warn!(%signal, "Received shutdown signal, draining connections");
    })
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Refuse to start against a node that cannot report its latest block.
async fn check_upstream(upstream: &RpcUpstream) -> Result<(), exitcode::ExitCode> {
    match tokio::time::timeout(STARTUP_CHECK_TIMEOUT, upstream.latest_block_number()).await {
        Ok(Ok(block)) => {
            info!(block, "Connected to Ethereum node");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Ethereum node check failed: {e}");
            Err(exitcode::UNAVAILABLE)
        }
        Err(_) => {
            error!(
                timeout_secs = STARTUP_CHECK_TIMEOUT.as_secs(),
                "Ethereum node did not answer in time"
            );
            Err(exitcode::UNAVAILABLE)
        }
    }
}
