//! The replay engine (C4, §4.4): reconstructs a stored request byte-faithfully
//! and dispatches it against its origin with an unrestricted client.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

use crate::error::ReplayError;
use crate::model::ExchangeId;
use crate::store::Store;

/// Live response streamed back to the caller. Not persisted (§4.4: "replays
/// are not re-captured into the store").
pub struct ReplayedResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

pub struct ReplayEngine {
	store: Arc<dyn Store>,
	client: reqwest::Client,
}

impl ReplayEngine {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self {
			store,
			// Redirects allowed, no proxy: this client must behave nothing
			// like the interception path it is replaying into.
			client: reqwest::Client::builder()
				.no_proxy()
				.build()
				.expect("reqwest client with default TLS backend must build"),
		}
	}

	pub async fn resend(&self, id: &ExchangeId) -> Result<ReplayedResponse, ReplayError> {
		let exchange = self.store.get(id).await?;
		let req = &exchange.request;

		if req.scheme.is_empty() || req.host.is_empty() {
			warn!(%id, "replay of malformed exchange (missing scheme or host)");
			return Err(ReplayError::Malformed);
		}

		let url = reconstruct_url(&req.scheme, &req.host, &req.path, &req.query_params);
		let method = reqwest::Method::from_bytes(req.method.as_bytes()).map_err(|_| ReplayError::Malformed)?;

		let mut headers = HeaderMap::new();
		for (name, value) in &req.headers {
			if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
				headers.insert(name, value);
			}
		}
		if !headers.contains_key(reqwest::header::COOKIE) {
			let cookie_header = build_cookie_header(&req.cookies);
			if let Some(value) = cookie_header {
				if let Ok(value) = HeaderValue::from_str(&value) {
					headers.insert(reqwest::header::COOKIE, value);
				}
			}
		}

		let body = req.raw_body.clone();

		let resp = self
			.client
			.request(method, url)
			.headers(headers)
			.body(body)
			.send()
			.await
			.map_err(|e| {
				warn!(%id, error = %e, "replay dispatch failed");
				ReplayError::UpstreamError(e.to_string())
			})?;

		let status = resp.status().as_u16();
		let headers = resp
			.headers()
			.iter()
			.map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
			.collect();
		let body = resp
			.bytes()
			.await
			.map_err(|e| ReplayError::UpstreamError(e.to_string()))?
			.to_vec();

		info!(%id, status, outcome = "ok", "replay");
		Ok(ReplayedResponse { status, headers, body })
	}
}

fn reconstruct_url(scheme: &str, host: &str, path: &str, query_params: &crate::model::ParamMap) -> String {
	let mut url = format!("{scheme}://{host}{path}");
	if !query_params.is_empty() {
		let encoded: String = url::form_urlencoded::Serializer::new(String::new())
			.extend_pairs(query_params.iter())
			.finish();
		url.push('?');
		url.push_str(&encoded);
	}
	url
}

fn build_cookie_header(cookies: &crate::model::ParamMap) -> Option<String> {
	if cookies.is_empty() {
		return None;
	}
	Some(
		cookies
			.iter()
			.map(|(k, v)| format!("{k}={v}"))
			.collect::<Vec<_>>()
			.join("; "),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reconstruct_url_appends_encoded_query() {
		let mut params = crate::model::ParamMap::new();
		params.insert("q".to_string(), "a b".to_string());
		let url = reconstruct_url("http", "example.test", "/search", &params);
		assert_eq!(url, "http://example.test/search?q=a+b");
	}

	#[test]
	fn reconstruct_url_without_query_has_no_question_mark() {
		let params = crate::model::ParamMap::new();
		let url = reconstruct_url("https", "example.test", "/", &params);
		assert_eq!(url, "https://example.test/");
	}

	#[test]
	fn build_cookie_header_joins_with_semicolons() {
		let mut cookies = crate::model::ParamMap::new();
		cookies.insert("a".to_string(), "1".to_string());
		cookies.insert("b".to_string(), "2".to_string());
		assert_eq!(build_cookie_header(&cookies), Some("a=1; b=2".to_string()));
	}
}
