//! The upstream HTTP client used for plain-HTTP forwarding (§4.3.2 step 4).
//!
//! Built directly on `hyper-util`'s legacy client: it never follows
//! redirects on its own (that behaviour lives one layer up, in clients like
//! `reqwest`), which is exactly the "return the last response verbatim"
//! contract the spec calls for.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::ProxyError;

type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

#[derive(Clone)]
pub struct UpstreamClient {
	inner: Client<Connector, Full<Bytes>>,
}

impl UpstreamClient {
	pub fn new() -> Self {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.expect("native root store must load")
			.https_or_http()
			.enable_http1()
			.build();
		Self {
			inner: Client::builder(TokioExecutor::new()).build(connector),
		}
	}

	/// Dispatches `req` with the fixed 30-second total deadline from §4.3.2.
	pub async fn send(
		&self,
		req: Request<Full<Bytes>>,
		timeout: Duration,
	) -> Result<Response<hyper::body::Incoming>, ProxyError> {
		match tokio::time::timeout(timeout, self.inner.request(req)).await {
			Ok(Ok(resp)) => Ok(resp),
			Ok(Err(e)) => Err(ProxyError::UpstreamError(e.to_string())),
			Err(_) => Err(ProxyError::UpstreamTimeout),
		}
	}
}

impl Default for UpstreamClient {
	fn default() -> Self {
		Self::new()
	}
}
