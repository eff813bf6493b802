use actix_web::{web, HttpResponse};
use ledger_watch_domain::model::TransactionQuery;
use ledger_watch_domain::storage::TransactionStore;
use metrics::counter;
use serde::Deserialize;

use crate::state::AppState;

use super::{parse_param, ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsParams {
    pub limit: Option<String>,
    pub skip: Option<String>,
}

/// `GET /api/v1/transactions?limit&skip`, newest first.
pub async fn transactions_handler(
    state: web::Data<AppState>,
    params: web::Query<TransactionsParams>,
) -> Result<HttpResponse, ApiError> {
    counter!("api_query_requests_total", "endpoint" => "transactions").increment(1);

    let limit = parse_param("limit", params.limit.as_deref())?
        .unwrap_or(TransactionQuery::DEFAULT_LIMIT);
    let skip = parse_param("skip", params.skip.as_deref())?.unwrap_or(0);

    let records = state
        .storage()
        .list_transactions(TransactionQuery::new(limit, skip))
        .await?;
    Ok(HttpResponse::Ok().json(records))
}
