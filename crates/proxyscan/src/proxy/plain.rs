//! Plain-HTTP capture and forward (§4.3.2).

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use tracing::{info, warn};

use super::ProxyInputs;
use super::capture::{self, CapturedRequest, CapturedResponse};
use super::client::UpstreamClient;
use crate::error::ProxyError;
use crate::model::{CapturedExchange, ExchangeId};

pub async fn handle(
	inputs: &ProxyInputs,
	client: &UpstreamClient,
	req: Request<Incoming>,
	scheme_from_transport: &str,
) -> Response<Full<Bytes>> {
	let captured = match capture::read_request(req, scheme_from_transport, inputs.max_body_bytes).await {
		Ok(c) => c,
		Err(e) => return error_response(&e),
	};

	let id = ExchangeId::next();
	let method = captured.canonical.method.clone();
	let host = captured.canonical.host.clone();

	let exchange = CapturedExchange {
		id: id.clone(),
		captured_at: Utc::now(),
		request: captured.canonical.clone(),
		response: None,
	};

	if let Err(e) = inputs.store.save(exchange).await {
		warn!(%id, %method, %host, error = %e, "capture save failed");
		return error_response(&ProxyError::Store(e));
	}

	let upstream_req = match build_upstream_request(captured) {
		Ok(r) => r,
		Err(e) => {
			info!(%id, %method, %host, outcome = "malformed", "plain capture");
			return error_response(&e);
		},
	};

	let resp = match client.send(upstream_req, inputs.upstream_timeout).await {
		Ok(r) => r,
		Err(e) => {
			warn!(%id, %method, %host, error = %e, "upstream dispatch failed");
			info!(%id, %method, %host, outcome = "upstream_error", "plain capture");
			// The exchange stays persisted with no response (P2); nothing
			// else to undo.
			return error_response(&e);
		},
	};

	let captured_resp = match capture::read_response(resp, inputs.max_body_bytes).await {
		Ok(r) => r,
		Err(e) => return error_response(&e),
	};

	if let Err(e) = inputs.store.update_response(&id, captured_resp.canonical.clone()).await {
		warn!(%id, error = %e, "update_response failed");
		return error_response(&ProxyError::Store(e));
	}

	info!(%id, %method, %host, outcome = "ok", "plain capture");
	build_client_response(captured_resp)
}

fn build_upstream_request(captured: CapturedRequest) -> Result<Request<Full<Bytes>>, ProxyError> {
	let CapturedRequest { canonical, mut parts } = captured;

	if parts.uri.scheme().is_none() {
		let rebuilt = format!("http://{}", parts.uri);
		parts.uri = rebuilt
			.parse()
			.map_err(|e| ProxyError::UpstreamError(format!("invalid request target: {e}")))?;
	}

	let headers: HeaderMap = capture::strip_hop_by_hop(&parts.headers);
	parts.headers = headers;

	Ok(Request::from_parts(parts, Full::new(Bytes::from(canonical.raw_body))))
}

pub(super) fn build_client_response(captured: CapturedResponse) -> Response<Full<Bytes>> {
	let mut builder = Response::builder().status(captured.canonical.status_code);
	if let Some(headers) = builder.headers_mut() {
		for (name, value) in headers_from_param_map(&captured.canonical.headers) {
			headers.append(name, value);
		}
	}
	builder
		.body(Full::new(captured.wire_body))
		.unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

pub(super) fn headers_from_param_map(
	map: &crate::model::ParamMap,
) -> impl Iterator<Item = (http::HeaderName, http::HeaderValue)> + '_ {
	map.iter().filter_map(|(k, v)| {
		let name = http::HeaderName::try_from(k.as_str()).ok()?;
		let value = http::HeaderValue::from_str(v).ok()?;
		Some((name, value))
	})
}

pub(super) fn error_response(err: &ProxyError) -> Response<Full<Bytes>> {
	let status = match err {
		ProxyError::UpstreamError(_) | ProxyError::UpstreamTimeout => StatusCode::BAD_GATEWAY,
		ProxyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
		ProxyError::Cert(_) => StatusCode::BAD_GATEWAY,
		ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
		ProxyError::ClientDisconnect => StatusCode::BAD_GATEWAY,
	};
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(Full::new(Bytes::from(format!("{err}\n"))))
		.unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
