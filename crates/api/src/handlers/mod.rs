pub mod alerts;
pub mod metrics;
pub mod transactions;

pub use alerts::alerts_handler;
pub use metrics::metrics_handler;
pub use transactions::transactions_handler;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use ledger_watch_domain::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid query parameter `{name}`: {reason}")]
    InvalidQuery { name: &'static str, reason: String },
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Parses an optional non-negative integer query parameter.
fn parse_param(name: &'static str, raw: Option<&str>) -> Result<Option<u64>, ApiError> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value.parse::<u64>().map_err(|err| ApiError::InvalidQuery {
                name,
                reason: err.to_string(),
            })
        })
        .transpose()
}
