//! `proxyscan`: an intercepting HTTP/HTTPS proxy with a per-exchange record
//! store, a replay engine and a heuristic vulnerability scanner.

pub mod canon;
pub mod certs;
pub mod config;
pub mod control;
pub mod error;
pub mod model;
pub mod proxy;
pub mod replay;
pub mod scan;
pub mod store;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::certs::{CertFactory, SignerConfig};
use crate::config::{Config, StoreKind};
use crate::control::AppState;
use crate::proxy::ProxyInputs;
use crate::replay::ReplayEngine;
use crate::scan::ScanEngine;
use crate::store::{MemoryStore, PgStore, Store};

/// Runs the full process: load config, init logging, load the root CA,
/// connect storage, spawn both listeners, and wait for either to exit or a
/// shutdown signal (§4.7 startup sequence).
pub async fn run(config: Config) -> anyhow::Result<()> {
	certs::load_root_ca(&config.certs_dir)
		.map_err(|e| anyhow::anyhow!("failed to load root CA from {}: {e}", config.certs_dir.display()))?;

	let store: Arc<dyn Store> = match config.store {
		StoreKind::Memory => Arc::new(MemoryStore::new()),
		StoreKind::Postgres => {
			let url = config
				.database_url
				.as_deref()
				.ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required when --store postgres is selected"))?;
			Arc::new(PgStore::connect(url).await?)
		},
	};

	let signer = SignerConfig::new(config.certs_dir.clone(), config.certs_dir.join("gen_cert.sh"));
	let certs = Arc::new(CertFactory::new(signer));

	let inputs = Arc::new(ProxyInputs {
		store: store.clone(),
		certs,
		upstream_timeout: Duration::from_secs(config.upstream_timeout_secs),
		max_body_bytes: config.max_body_bytes,
	});

	let app_state = Arc::new(AppState {
		store: store.clone(),
		replay: ReplayEngine::new(store.clone()),
		scan: ScanEngine::new(store),
	});

	let proxy_addr = config.proxy_addr;
	let control_addr = config.control_addr;

	let proxy_task = tokio::spawn(async move { proxy::serve(proxy_addr, inputs).await });
	let control_task = tokio::spawn(async move {
		let router = control::router(app_state);
		let listener = tokio::net::TcpListener::bind(control_addr).await?;
		axum::serve(listener, router).await
	});

	info!(%proxy_addr, %control_addr, "proxyscan listening");

	tokio::select! {
		res = proxy_task => {
			res??;
		}
		res = control_task => {
			res??;
		}
		_ = tokio::signal::ctrl_c() => {
			info!("shutdown signal received, draining connections");
		}
	}

	Ok(())
}
