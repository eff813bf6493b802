//! Process-wide tracing and Prometheus wiring for the monitor and API
//! binaries. Both installers are idempotent so tests can call
//! [`init_telemetry`] freely.

use std::{env, net::SocketAddr, str::FromStr, sync::Arc};

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::hydrate_env_file;

const DEFAULT_LOG_FILTER: &str = "info";

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static RECORDER: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Line layout of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            other => Err(TelemetryError::InvalidLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    service: String,
    log_filter: String,
    log_format: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER`, `<PREFIX>_LOG_FORMAT` and
    /// `<PREFIX>_METRICS_ADDRESS`. All are optional; blank values count as
    /// unset.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();
        let read = |suffix: &str| {
            env::var(format!("{upper}_{suffix}"))
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            service: upper.to_ascii_lowercase(),
            log_filter: read("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_format: read("LOG_FORMAT").unwrap_or_default(),
            metrics_address: read("METRICS_ADDRESS"),
        }
    }

    /// Value of the `service` label attached to every exported metric.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn log_format(&self) -> Result<LogFormat, TelemetryError> {
        self.log_format.parse()
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle onto the installed Prometheus recorder.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_recorder(config)?;
    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;
    let fmt = tracing_subscriber::fmt::layer().with_target(true);
    let fmt = match config.log_format()? {
        LogFormat::Full => fmt.boxed(),
        LogFormat::Compact => fmt.compact().boxed(),
    };

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(fmt.with_filter(filter))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }
    Ok(())
}

fn install_recorder(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    RECORDER
        .get_or_try_init(|| {
            let mut builder =
                PrometheusBuilder::new().add_global_label("service", config.service());
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr = addr.parse().map_err(|err: std::net::AddrParseError| {
                    TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_metrics();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_metrics() {
    describe_counter!(
        "monitor_events_total",
        Unit::Count,
        "Log events received, by dedup result"
    );
    describe_counter!(
        "monitor_transactions_total",
        Unit::Count,
        "Processed transactions, by outcome"
    );
    describe_counter!(
        "monitor_fetch_retries_total",
        Unit::Count,
        "Throttled detail lookups that were retried"
    );
    describe_counter!("monitor_alerts_total", Unit::Count, "Alerts handled by the fan-out");
    describe_counter!(
        "monitor_subscriptions_total",
        Unit::Count,
        "Log subscription attempts"
    );
    describe_counter!(
        "monitor_health_probes_total",
        Unit::Count,
        "Endpoint health checks, by result"
    );
    describe_gauge!("monitor_endpoints_live", "Endpoints currently selectable");
    describe_counter!(
        "api_query_requests_total",
        Unit::Count,
        "Query service requests, by endpoint"
    );
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("unknown log format `{0}` (expected `full` or `compact`)")]
    InvalidLogFormat(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
