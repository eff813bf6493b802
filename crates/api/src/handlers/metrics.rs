use actix_web::{web::Data, HttpResponse};
use metrics::counter;

use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Prometheus scrape endpoint backed by the process-wide recorder.
pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    counter!("api_query_requests_total", "endpoint" => "metrics").increment(1);
    HttpResponse::Ok()
        .content_type(PROMETHEUS_TEXT)
        .body(state.telemetry().render_metrics())
}
