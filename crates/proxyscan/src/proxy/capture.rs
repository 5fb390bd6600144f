//! Shared request/response canonicalisation used by both the plain-HTTP and
//! MITM capture paths (§4.3.2 steps 1-2 and 5-6).

use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use tokio::io::AsyncReadExt;

use crate::canon;
use crate::error::ProxyError;
use crate::model::{CanonicalRequest, CanonicalResponse};

/// Parsed request plus the raw body bytes, ready to be re-wrapped for the
/// upstream dispatch.
pub struct CapturedRequest {
	pub canonical: CanonicalRequest,
	pub parts: http::request::Parts,
}

pub async fn read_request(
	req: Request<Incoming>,
	scheme_from_transport: &str,
	max_body_bytes: usize,
) -> Result<CapturedRequest, ProxyError> {
	let (parts, body) = req.into_parts();
	let body_bytes = collect_limited(body, max_body_bytes).await?;

	let headers = canon::flatten_headers(&parts.headers);
	let scheme = parts
		.uri
		.scheme_str()
		.map(str::to_string)
		.unwrap_or_else(|| scheme_from_transport.to_string());
	let host = parts
		.uri
		.authority()
		.map(|a| a.as_str().to_string())
		.or_else(|| header_value(&headers, "host"))
		.unwrap_or_default();
	let host = strip_default_port(&host, &scheme);
	let path = parts.uri.path().to_string();
	let query_params = canon::parse_query_params(parts.uri.query());
	let cookies = canon::parse_cookies(&headers);
	let form_params = if canon::is_form_urlencoded(header_value(&headers, "content-type").as_deref()) {
		canon::parse_form_params(&body_bytes)
	} else {
		Default::default()
	};

	let canonical = CanonicalRequest {
		method: parts.method.as_str().to_string(),
		scheme,
		host,
		path,
		query_params,
		headers,
		cookies,
		form_params,
		raw_body: body_bytes.to_vec(),
	};

	Ok(CapturedRequest { canonical, parts })
}

pub struct CapturedResponse {
	pub canonical: CanonicalResponse,
	/// The body bytes in their original wire encoding, for returning to the
	/// client untouched (§9 "Body decoding asymmetry").
	pub wire_body: Bytes,
}

pub async fn read_response(
	resp: Response<Incoming>,
	max_body_bytes: usize,
) -> Result<CapturedResponse, ProxyError> {
	let (parts, body) = resp.into_parts();
	let wire_body = collect_limited(body, max_body_bytes).await?;
	let headers = canon::flatten_headers(&parts.headers);

	let is_gzip = header_value(&headers, "content-encoding")
		.is_some_and(|v| v.to_ascii_lowercase().split(',').any(|e| e.trim() == "gzip"));

	let stored_body = if is_gzip {
		gunzip(&wire_body).await?
	} else {
		wire_body.to_vec()
	};

	let canonical = CanonicalResponse {
		status_code: parts.status.as_u16(),
		status_text: parts.status.canonical_reason().unwrap_or("").to_string(),
		headers,
		body: stored_body,
	};

	Ok(CapturedResponse { canonical, wire_body })
}

/// Strips a trailing `:80` (for `http`) or `:443` (for `https`) from a
/// plain-HTTP authority, per §3's "omit the port when it equals the scheme's
/// default" rule. A non-default port, or a default port on an unrecognised
/// scheme, is left alone.
fn strip_default_port(host: &str, scheme: &str) -> String {
	let default_port = match scheme {
		"http" => "80",
		"https" => "443",
		_ => return host.to_string(),
	};
	match host.rsplit_once(':') {
		Some((h, port)) if port == default_port => h.to_string(),
		_ => host.to_string(),
	}
}

fn header_value(headers: &crate::model::ParamMap, name: &str) -> Option<String> {
	headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case(name))
		.map(|(_, v)| v.clone())
}

async fn collect_limited(body: Incoming, max_bytes: usize) -> Result<Bytes, ProxyError> {
	Limited::new(body, max_bytes)
		.collect()
		.await
		.map(|c| c.to_bytes())
		.map_err(|_| ProxyError::BodyTooLarge)
}

async fn gunzip(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
	use async_compression::tokio::bufread::GzipDecoder;

	let mut decoder = GzipDecoder::new(tokio::io::BufReader::new(body));
	let mut out = Vec::new();
	decoder
		.read_to_end(&mut out)
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("gzip decode failed: {e}")))?;
	Ok(out)
}

/// Strips hop-by-hop headers and copies the rest onto a fresh header map,
/// preserving original casing (§4.3.2 step 3, §9).
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
	let mut out = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers.iter() {
		if canon::is_hop_by_hop(name.as_str()) {
			continue;
		}
		out.append(name, value.clone());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strip_default_port_removes_matching_default() {
		assert_eq!(strip_default_port("example.test:80", "http"), "example.test");
		assert_eq!(strip_default_port("example.test:443", "https"), "example.test");
	}

	#[test]
	fn strip_default_port_keeps_non_default_port() {
		assert_eq!(strip_default_port("example.test:8080", "http"), "example.test:8080");
		assert_eq!(strip_default_port("example.test:443", "http"), "example.test:443");
	}

	#[test]
	fn strip_default_port_leaves_bare_host_alone() {
		assert_eq!(strip_default_port("example.test", "http"), "example.test");
	}
}
