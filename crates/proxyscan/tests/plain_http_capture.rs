//! Drives the proxy listener end to end (P1): a real TCP client sends an
//! absolute-form HTTP request to a real `proxy::serve` listener, which
//! forwards it to a `wiremock` origin and captures the exchange.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proxyscan::certs::{CertFactory, SignerConfig};
use proxyscan::proxy::{self, ProxyInputs};
use proxyscan::store::{MemoryStore, Store};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static NEXT_PORT: AtomicU16 = AtomicU16::new(18181);

fn test_inputs(store: Arc<dyn Store>) -> Arc<ProxyInputs> {
	let signer = SignerConfig::new(std::env::temp_dir(), std::env::temp_dir().join("unused-signer.sh"));
	Arc::new(ProxyInputs {
		store,
		certs: Arc::new(CertFactory::new(signer)),
		upstream_timeout: Duration::from_secs(5),
		max_body_bytes: 1024 * 1024,
	})
}

async fn send_raw(addr: SocketAddr, request: &str) -> String {
	let mut stream = TcpStream::connect(addr).await.expect("connect to proxy listener");
	stream.write_all(request.as_bytes()).await.expect("write request");

	let mut buf = Vec::new();
	tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
		.await
		.expect("timed out reading proxy response")
		.expect("read proxy response");
	String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn plain_get_is_forwarded_and_captured() {
	let origin = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/hello"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string("hello from origin")
				.insert_header("content-type", "text/plain"),
		)
		.mount(&origin)
		.await;

	let store = Arc::new(MemoryStore::new());
	let inputs = test_inputs(store.clone());

	let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
	let proxy_addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
	tokio::spawn(proxy::serve(proxy_addr, inputs));
	tokio::time::sleep(Duration::from_millis(50)).await;

	let origin_addr = *origin.address();
	let request = format!(
		"GET http://{origin_addr}/hello HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n"
	);
	let response = send_raw(proxy_addr, &request).await;

	assert!(response.starts_with("HTTP/1.1 200"), "unexpected status line: {response}");
	assert!(response.ends_with("hello from origin"), "unexpected body: {response}");

	let exchanges = store.list_all().await.expect("list_all");
	assert_eq!(exchanges.len(), 1);
	let exchange = &exchanges[0];
	assert_eq!(exchange.request.method, "GET");
	assert_eq!(exchange.request.path, "/hello");
	assert_eq!(exchange.request.host, origin_addr.to_string());
	let response_record = exchange.response.as_ref().expect("response recorded");
	assert_eq!(response_record.status_code, 200);
	assert_eq!(response_record.body, b"hello from origin");
}

#[tokio::test]
async fn upstream_down_is_recorded_with_no_response() {
	let store = Arc::new(MemoryStore::new());
	let inputs = test_inputs(store.clone());

	let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
	let proxy_addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
	tokio::spawn(proxy::serve(proxy_addr, inputs));
	tokio::time::sleep(Duration::from_millis(50)).await;

	// Nothing is listening on this port; the upstream dial should fail.
	let dead_port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
	let request = format!(
		"GET http://127.0.0.1:{dead_port}/missing HTTP/1.1\r\nHost: 127.0.0.1:{dead_port}\r\nConnection: close\r\n\r\n"
	);
	let response = send_raw(proxy_addr, &request).await;

	assert!(response.starts_with("HTTP/1.1 502"), "expected a bad-gateway status, got: {response}");

	let exchanges = store.list_all().await.expect("list_all");
	assert_eq!(exchanges.len(), 1);
	assert!(exchanges[0].response.is_none());
}
