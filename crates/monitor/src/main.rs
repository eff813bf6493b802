//! Monitor binary that watches configured addresses over WebSocket RPC.

use std::io;
use std::sync::Arc;

use ledger_watch_domain::config::MonitorConfig;
use ledger_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use ledger_watch_monitor::{
    run_monitor, EndpointPool, EthersConnector, HealthConfig, MonitorError, MonitorSettings,
};
use ledger_watch_storage::SeaOrmStorage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let _telemetry = init_telemetry(&telemetry_config)?;
    let settings = MonitorSettings::try_from(&config)?;
    let storage = Arc::new(SeaOrmStorage::connect(config.database_url()).await?);
    let pool = EndpointPool::connect(
        config.rpc_endpoints(),
        EthersConnector,
        HealthConfig::default(),
    )
    .await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));
    run_monitor(settings, storage, Arc::new(pool), cancel).await
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(?err, "SIGTERM handler unavailable");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "ctrl-c handler unavailable");
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "ctrl-c handler unavailable");
    }
}
