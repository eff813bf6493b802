use actix_web::{middleware::Logger, web, App, HttpServer};
use ledger_watch_domain::config::{ApiConfig, ConfigError};
use ledger_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use ledger_watch_domain::storage::StorageError;
use ledger_watch_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::info;

use crate::{
    handlers::{alerts_handler, metrics_handler, transactions_handler},
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let state = AppState::new(storage, telemetry);

    info!(address = config.api_bind_address(), "query service listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(config.api_bind_address())?
    .run()
    .await?;

    Ok(())
}

/// Read-only query routes plus the Prometheus scrape endpoint.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/transactions", web::get().to(transactions_handler))
        .route("/api/v1/alerts", web::get().to(alerts_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
