//! HTTP rendering of pipeline failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use geogate_core::{CoreError, GateError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body written for every refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub description: String,
}

/// Axum-facing wrapper around [`GateError`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub GateError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: self.0.code().to_string(),
            description: self.0.description().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
