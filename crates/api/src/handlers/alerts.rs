use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use ledger_watch_domain::storage::AlertStore;
use metrics::counter;
use serde::Deserialize;

use crate::state::AppState;

use super::{parse_param, ApiError};

pub const DEFAULT_RANGE_HOURS: u64 = 24;
// Keeps `now - range` inside chrono's representable window.
const MAX_RANGE_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Default, Deserialize)]
pub struct AlertsParams {
    pub range: Option<String>,
}

/// `GET /api/v1/alerts?range=<hours>`, newest first.
pub async fn alerts_handler(
    state: web::Data<AppState>,
    params: web::Query<AlertsParams>,
) -> Result<HttpResponse, ApiError> {
    counter!("api_query_requests_total", "endpoint" => "alerts").increment(1);

    let hours = parse_param("range", params.range.as_deref())?.unwrap_or(DEFAULT_RANGE_HOURS);
    if hours == 0 {
        return Err(ApiError::InvalidQuery {
            name: "range",
            reason: "must be at least one hour".into(),
        });
    }

    let hours = hours.min(MAX_RANGE_HOURS) as i64;
    let since = Utc::now() - Duration::hours(hours);
    let records = state.storage().list_alerts_since(since).await?;
    Ok(HttpResponse::Ok().json(records))
}
