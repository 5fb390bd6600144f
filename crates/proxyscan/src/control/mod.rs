//! The control API adapter (C6, §4.6): a small read-only `axum` surface over
//! C1 (list/get), C4 (replay) and C5 (scan).

mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tracing::warn;

use crate::model::{CapturedExchange, ExchangeId, Finding};
use crate::replay::ReplayEngine;
use crate::scan::ScanEngine;
use crate::store::Store;

pub use error::ApiError;

pub struct AppState {
	pub store: Arc<dyn Store>,
	pub replay: ReplayEngine,
	pub scan: ScanEngine,
}

pub fn router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/requests", get(list_requests))
		.route("/requests/{id}", get(get_request))
		.route("/repeat/{id}", get(repeat_request))
		.route("/scan/{id}", get(scan_request))
		.route("/healthz", get(healthz))
		.with_state(state)
}

async fn list_requests(State(state): State<Arc<AppState>>) -> Result<Json<Vec<CapturedExchange>>, ApiError> {
	let exchanges = state.store.list_all().await?;
	Ok(Json(exchanges))
}

async fn get_request(
	State(state): State<Arc<AppState>>,
	Path(id): Path<String>,
) -> Result<Json<CapturedExchange>, ApiError> {
	let exchange = state.store.get(&ExchangeId(id)).await?;
	Ok(Json(exchange))
}

async fn repeat_request(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
	let replayed = state.replay.resend(&ExchangeId(id)).await?;
	let mut builder = axum::http::Response::builder().status(replayed.status);
	if let Some(headers) = builder.headers_mut() {
		for (name, value) in &replayed.headers {
			if let (Ok(name), Ok(value)) = (
				axum::http::HeaderName::try_from(name.as_str()),
				axum::http::HeaderValue::from_str(value),
			) {
				headers.append(name, value);
			}
		}
	}
	let resp = builder
		.body(axum::body::Body::from(replayed.body))
		.unwrap_or_else(|_| axum::http::Response::new(axum::body::Body::empty()));
	Ok(resp)
}

async fn scan_request(
	State(state): State<Arc<AppState>>,
	Path(id): Path<String>,
) -> Result<Json<Vec<Finding>>, ApiError> {
	let findings = state.scan.scan(&ExchangeId(id)).await?;
	Ok(Json(findings))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
	match state.store.list_all().await {
		Ok(_) => Json(json!({"status": "ok"})).into_response(),
		Err(e) => {
			warn!(error = %e, "healthz store check failed");
			(axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "unavailable"}))).into_response()
		},
	}
}
