use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::LedgerError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Internal error: {0}")]
    Internal(#[from] LedgerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Internal(ref e) => {
                error!("Request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
