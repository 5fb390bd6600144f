//! CONNECT-based MITM interception (C3, §4.3.3).
//!
//! The CONNECT request is answered by completing hyper's upgrade handshake
//! rather than by writing a response ourselves: returning `200 OK` from this
//! handler is what causes hyper to hand the raw duplex stream back to us as
//! an `Upgraded`, satisfying "hijack the connection, then write the 200".

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{info, warn};

use super::ProxyInputs;
use super::capture::{self, CapturedRequest};
use super::plain;
use crate::error::ProxyError;
use crate::model::{CapturedExchange, ExchangeId, HostCert};

/// Accepts one CONNECT request. The inner tunnel is driven on a spawned task
/// so the accept loop can move on to the next connection immediately.
pub async fn handle(inputs: Arc<ProxyInputs>, req: Request<Incoming>) -> Response<Full<Bytes>> {
	let authority = req.uri().authority().map(|a| a.to_string()).unwrap_or_default();

	if authority.is_empty() {
		warn!("CONNECT request had no authority-form target");
		return Response::builder()
			.status(StatusCode::BAD_REQUEST)
			.body(Full::new(Bytes::from_static(b"malformed CONNECT target\n")))
			.unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
	}

	let (target_host, target_port) = split_authority(&authority);
	let log_authority = authority.clone();

	tokio::spawn(async move {
		match hyper::upgrade::on(req).await {
			Ok(upgraded) => {
				if let Err(e) = run_tunnel(inputs, upgraded, authority, target_host.clone(), target_port).await {
					warn!(host = %target_host, error = %e, "mitm tunnel failed");
				}
			},
			Err(e) => warn!(authority = %log_authority, error = %e, "CONNECT upgrade failed"),
		}
	});

	info!(authority = %authority, "CONNECT accepted");
	Response::builder()
		.status(StatusCode::OK)
		.body(Full::new(Bytes::new()))
		.unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Splits a CONNECT authority into host and port, defaulting to 443. Real
/// CONNECT targets always carry an explicit port, so the default is a
/// fallback for malformed input rather than the common case.
fn split_authority(authority: &str) -> (String, u16) {
	match authority.rsplit_once(':') {
		Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
			(host.to_string(), port.parse().unwrap_or(443))
		},
		_ => (authority.to_string(), 443),
	}
}

async fn run_tunnel(
	inputs: Arc<ProxyInputs>,
	upgraded: Upgraded,
	authority: String,
	target_host: String,
	target_port: u16,
) -> Result<(), ProxyError> {
	let cert = inputs.certs.get(&target_host).await?;

	let server_config = build_server_tls_config(&cert)?;
	let acceptor = TlsAcceptor::from(Arc::new(server_config));
	let client_tls = acceptor
		.accept(TokioIo::new(upgraded))
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("client TLS handshake failed: {e}")))?;

	let origin_tcp = TcpStream::connect((target_host.as_str(), target_port))
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("origin connect to {target_host}:{target_port} failed: {e}")))?;

	let connector = TlsConnector::from(origin_tls_config());
	let server_name = ServerName::try_from(target_host.clone())
		.map_err(|e| ProxyError::UpstreamError(format!("invalid SNI name {target_host}: {e}")))?;
	let origin_tls = connector
		.connect(server_name, origin_tcp)
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("origin TLS handshake with {target_host} failed: {e}")))?;

	let (send_request, conn) = hyper::client::conn::http1::handshake(TokioIo::new(origin_tls))
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("origin handshake with {target_host} failed: {e}")))?;
	tokio::spawn(async move {
		if let Err(e) = conn.await {
			warn!(error = %e, "mitm origin connection driver failed");
		}
	});

	let send_request = Arc::new(AsyncMutex::new(send_request));
	let svc_inputs = inputs.clone();
	let svc_authority = authority.clone();
	let service = service_fn(move |req: Request<Incoming>| {
		let inputs = svc_inputs.clone();
		let authority = svc_authority.clone();
		let send_request = send_request.clone();
		async move { Ok::<_, Infallible>(serve_inner_request(inputs, authority, send_request, req).await) }
	});

	// Keep-alive off: one CONNECT tunnel carries exactly one inner request,
	// per the intercept flow this mirrors.
	hyper::server::conn::http1::Builder::new()
		.keep_alive(false)
		.serve_connection(TokioIo::new(client_tls), service)
		.await
		.map_err(|e| ProxyError::UpstreamError(format!("mitm client connection error: {e}")))?;

	info!(host = %target_host, "mitm tunnel closed");
	Ok(())
}

async fn serve_inner_request(
	inputs: Arc<ProxyInputs>,
	authority: String,
	send_request: Arc<AsyncMutex<SendRequest<Full<Bytes>>>>,
	req: Request<Incoming>,
) -> Response<Full<Bytes>> {
	let mut captured = match capture::read_request(req, "https", inputs.max_body_bytes).await {
		Ok(c) => c,
		Err(e) => return plain::error_response(&e),
	};
	// The CONNECT target is authoritative for scheme and host, regardless of
	// what the inner request's own Host header says (§4.3.3 step 7).
	captured.canonical.scheme = "https".to_string();
	captured.canonical.host = authority.clone();

	let id = ExchangeId::next();
	let method = captured.canonical.method.clone();

	let exchange = CapturedExchange {
		id: id.clone(),
		captured_at: Utc::now(),
		request: captured.canonical.clone(),
		response: None,
	};
	if let Err(e) = inputs.store.save(exchange).await {
		warn!(%id, %method, host = %authority, error = %e, "mitm capture save failed");
		return plain::error_response(&ProxyError::Store(e));
	}

	let CapturedRequest { canonical, mut parts } = captured;
	let headers = capture::strip_hop_by_hop(&parts.headers);
	parts.headers = headers;
	let upstream_req = Request::from_parts(parts, Full::new(Bytes::from(canonical.raw_body)));

	let resp = {
		let mut guard = send_request.lock().await;
		match tokio::time::timeout(inputs.upstream_timeout, guard.send_request(upstream_req)).await {
			Ok(Ok(r)) => r,
			Ok(Err(e)) => {
				warn!(%id, %method, host = %authority, error = %e, "origin dispatch failed");
				return plain::error_response(&ProxyError::UpstreamError(e.to_string()));
			},
			Err(_) => {
				warn!(%id, %method, host = %authority, "origin dispatch timed out");
				return plain::error_response(&ProxyError::UpstreamTimeout);
			},
		}
	};

	let captured_resp = match capture::read_response(resp, inputs.max_body_bytes).await {
		Ok(r) => r,
		Err(e) => return plain::error_response(&e),
	};

	if let Err(e) = inputs.store.update_response(&id, captured_resp.canonical.clone()).await {
		warn!(%id, error = %e, "mitm update_response failed");
		return plain::error_response(&ProxyError::Store(e));
	}

	info!(%id, %method, host = %authority, outcome = "ok", "mitm capture");
	plain::build_client_response(captured_resp)
}

fn build_server_tls_config(cert: &HostCert) -> Result<rustls::ServerConfig, ProxyError> {
	rustls::ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(cert.leaf_cert_chain.clone(), cert.private_key.clone())
		.map_err(|e| ProxyError::UpstreamError(format!("server TLS config rejected leaf cert: {e}")))
}

static ORIGIN_TLS_CONFIG: Lazy<Arc<rustls::ClientConfig>> = Lazy::new(|| {
	let mut roots = rustls::RootCertStore::empty();
	let loaded = rustls_native_certs::load_native_certs();
	for cert in loaded.certs {
		let _ = roots.add(cert);
	}
	for err in loaded.errors {
		warn!(error = %err, "skipped a native root certificate");
	}
	Arc::new(
		rustls::ClientConfig::builder()
			.with_root_certificates(roots)
			.with_no_client_auth(),
	)
});

fn origin_tls_config() -> Arc<rustls::ClientConfig> {
	ORIGIN_TLS_CONFIG.clone()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_authority_reads_explicit_port() {
		assert_eq!(split_authority("secure.test:443"), ("secure.test".to_string(), 443));
		assert_eq!(split_authority("secure.test:8443"), ("secure.test".to_string(), 8443));
	}

	#[test]
	fn split_authority_falls_back_to_443_without_a_port() {
		assert_eq!(split_authority("secure.test"), ("secure.test".to_string(), 443));
	}
}
