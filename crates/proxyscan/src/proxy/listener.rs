//! Accept loop for the proxy's single listening port (§4.3.1). Each
//! connection is dispatched per request: CONNECT goes to the MITM engine,
//! everything else is forwarded as plain HTTP.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::client::UpstreamClient;
use super::{ProxyInputs, mitm, plain};

pub async fn serve(addr: SocketAddr, inputs: Arc<ProxyInputs>) -> std::io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	info!(%addr, "proxy listener bound");
	let client = UpstreamClient::new();

	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(pair) => pair,
			Err(e) => {
				warn!(error = %e, "proxy accept failed");
				continue;
			},
		};

		let inputs = inputs.clone();
		let client = client.clone();
		tokio::spawn(async move {
			let io = TokioIo::new(stream);
			let service = service_fn(move |req: Request<Incoming>| {
				let inputs = inputs.clone();
				let client = client.clone();
				async move { Ok::<_, Infallible>(dispatch(inputs, client, req).await) }
			});

			// `.with_upgrades()` is what lets CONNECT hand the raw stream off
			// to the MITM engine instead of the connection closing after the
			// first response.
			if let Err(e) = hyper::server::conn::http1::Builder::new()
				.serve_connection(io, service)
				.with_upgrades()
				.await
			{
				error!(%peer, error = %e, "proxy connection error");
			}
		});
	}
}

async fn dispatch(inputs: Arc<ProxyInputs>, client: UpstreamClient, req: Request<Incoming>) -> Response<Full<Bytes>> {
	if req.method() == Method::CONNECT {
		mitm::handle(inputs, req).await
	} else {
		plain::handle(&inputs, &client, req, "http").await
	}
}
