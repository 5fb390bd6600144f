//! Maps the internal error enums onto the control API's wire representation:
//! a status code plus `{"error": "<message>"}`, mirroring the teacher's
//! single-conversion-point pattern for turning typed errors into responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::error::{ReplayError, ScanError, StoreError};

#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Replay(#[from] ReplayError),
	#[error(transparent)]
	Scan(#[from] ScanError),
}

impl ApiError {
	fn status_code(&self) -> StatusCode {
		match self {
			ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
			ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
			ApiError::Replay(ReplayError::NotFound(_)) => StatusCode::NOT_FOUND,
			ApiError::Replay(ReplayError::Malformed) => StatusCode::INTERNAL_SERVER_ERROR,
			ApiError::Replay(ReplayError::UpstreamError(_)) => StatusCode::BAD_GATEWAY,
			ApiError::Replay(ReplayError::StorageUnavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
			ApiError::Scan(ScanError::NotFound(_)) => StatusCode::NOT_FOUND,
			ApiError::Scan(ScanError::StorageUnavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR || self.status_code() == StatusCode::BAD_GATEWAY {
			warn!(error = %self, "control API request failed");
		}
		let body = json!({"error": self.to_string()});
		(self.status_code(), Json(body)).into_response()
	}
}
