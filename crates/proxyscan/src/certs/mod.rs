//! The per-host certificate factory (C2, §4.2).

mod signer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CertError;
use crate::model::HostCert;

pub use signer::SignerConfig;

/// Mints and caches per-host leaf certificates signed by a fixed root CA.
///
/// Concurrency: coalesced per host behind a per-host async mutex with a
/// double-checked cache read, so at most one signing operation is ever in
/// flight for a given host (P4) — a waiter that blocks on the lock finds the
/// cache already warm once it acquires it, and never re-signs. Different
/// hosts sign concurrently, the relaxation over a single process-wide lock
/// that §4.2 explicitly permits.
pub struct CertFactory {
	cache: RwLock<HashMap<String, HostCert>>,
	locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
	signer: SignerConfig,
}

impl CertFactory {
	pub fn new(signer: SignerConfig) -> Self {
		Self {
			cache: RwLock::new(HashMap::new()),
			locks: Mutex::new(HashMap::new()),
			signer,
		}
	}

	/// Returns a leaf certificate for `host` (port stripped), signing and
	/// caching one if absent or expired.
	pub async fn get(&self, host: &str) -> Result<HostCert, CertError> {
		let host = strip_port(host);

		if let Some(cert) = self.cached_fresh(&host) {
			return Ok(cert);
		}

		let host_lock = self.host_lock(&host);
		let _flight = host_lock.lock().await;

		// Another waiter may have minted this host's cert while we queued for
		// the lock; recheck before invoking the signer again.
		if let Some(cert) = self.cached_fresh(&host) {
			return Ok(cert);
		}

		let cert = sign_and_load(&self.signer, &host).await.inspect_err(|e| {
			warn!(host = %host, error = %e, "certificate mint failed");
		})?;

		self
			.cache
			.write()
			.expect("cert cache poisoned")
			.insert(host.clone(), cert.clone());
		info!(host = %host, not_after = %cert.not_after, "minted leaf certificate");
		Ok(cert)
	}

	fn host_lock(&self, host: &str) -> Arc<AsyncMutex<()>> {
		self
			.locks
			.lock()
			.expect("cert lock map poisoned")
			.entry(host.to_string())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone()
	}

	fn cached_fresh(&self, host: &str) -> Option<HostCert> {
		let guard = self.cache.read().expect("cert cache poisoned");
		let cert = guard.get(host)?;
		(cert.not_after > Utc::now()).then(|| cert.clone())
	}
}

/// Confirms `<cert_dir>/ca.crt` and `<cert_dir>/ca.key` exist and parse as
/// PEM (§6.4). The external signer is the one that actually signs with this
/// material; this is a startup sanity check, not a load into long-lived
/// state.
pub fn load_root_ca(cert_dir: &std::path::Path) -> Result<(), CertError> {
	let cert_pem = std::fs::read(cert_dir.join("ca.crt"))?;
	let key_pem = std::fs::read(cert_dir.join("ca.key"))?;

	let chain = parse_cert_chain(&cert_pem).map_err(|e| CertError::LoadFailed {
		host: "ca".to_string(),
		detail: e,
	})?;
	if chain.is_empty() {
		return Err(CertError::LoadFailed {
			host: "ca".to_string(),
			detail: "ca.crt contains no certificates".to_string(),
		});
	}
	parse_private_key(&key_pem).map_err(|e| CertError::LoadFailed {
		host: "ca".to_string(),
		detail: e,
	})?;

	Ok(())
}

pub fn strip_port(host: &str) -> String {
	// IPv6 literals come as `[::1]:443`; only strip a trailing `:port` when
	// the part after the last colon is all digits, so a bare IPv6 address
	// without a port is left untouched.
	match host.rsplit_once(':') {
		Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h.to_string(),
		_ => host.to_string(),
	}
}

async fn sign_and_load(signer: &SignerConfig, host: &str) -> Result<HostCert, CertError> {
	signer.invoke(host).await?;
	load_cert_pair(&signer.cert_dir, host)
}

fn load_cert_pair(cert_dir: &std::path::Path, host: &str) -> Result<HostCert, CertError> {
	let cert_path: PathBuf = cert_dir.join(format!("{host}.crt"));
	let key_path: PathBuf = cert_dir.join(format!("{host}.key"));

	let cert_pem = std::fs::read(&cert_path).map_err(|e| CertError::LoadFailed {
		host: host.to_string(),
		detail: format!("{}: {e}", cert_path.display()),
	})?;
	let key_pem = std::fs::read(&key_path).map_err(|e| CertError::LoadFailed {
		host: host.to_string(),
		detail: format!("{}: {e}", key_path.display()),
	})?;

	let chain = parse_cert_chain(&cert_pem).map_err(|e| CertError::LoadFailed {
		host: host.to_string(),
		detail: e,
	})?;
	let key = parse_private_key(&key_pem).map_err(|e| CertError::LoadFailed {
		host: host.to_string(),
		detail: e,
	})?;

	let leaf = chain.first().ok_or_else(|| CertError::LoadFailed {
		host: host.to_string(),
		detail: "certificate file contains no certificates".to_string(),
	})?;

	let not_after = validate_leaf(leaf, host)?;

	Ok(HostCert {
		host: host.to_string(),
		leaf_cert_chain: chain,
		private_key: key,
		not_after,
	})
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
	let mut reader = std::io::BufReader::new(pem);
	rustls_pemfile::certs(&mut reader)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| format!("malformed certificate PEM: {e}"))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, String> {
	let mut reader = std::io::BufReader::new(pem);
	rustls_pemfile::private_key(&mut reader)
		.map_err(|e| format!("malformed private key PEM: {e}"))?
		.ok_or_else(|| "key file contains no private key".to_string())
}

fn validate_leaf(der: &CertificateDer<'_>, host: &str) -> Result<chrono::DateTime<Utc>, CertError> {
	let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| CertError::InvalidCertificate {
		host: host.to_string(),
		reason: format!("could not parse certificate: {e}"),
	})?;

	let not_after = cert.validity().not_after.to_datetime();
	let not_after = chrono::DateTime::from_timestamp(not_after.unix_timestamp(), 0)
		.ok_or_else(|| CertError::InvalidCertificate {
			host: host.to_string(),
			reason: "certificate not_after is out of range".to_string(),
		})?;

	if not_after <= Utc::now() {
		return Err(CertError::InvalidCertificate {
			host: host.to_string(),
			reason: "certificate is already expired".to_string(),
		});
	}

	let has_cn = cert
		.subject()
		.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.is_some_and(|cn| !cn.is_empty());
	if !has_cn {
		return Err(CertError::InvalidCertificate {
			host: host.to_string(),
			reason: "subject common name is empty".to_string(),
		});
	}

	Ok(not_after)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strip_port_removes_trailing_numeric_port() {
		assert_eq!(strip_port("example.test:443"), "example.test");
		assert_eq!(strip_port("example.test"), "example.test");
	}

	#[test]
	fn strip_port_leaves_bare_ipv6_literal_alone() {
		assert_eq!(strip_port("[::1]"), "[::1]");
		assert_eq!(strip_port("[::1]:8443"), "[::1]");
	}

	static TEST_DIR_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

	/// Drives 8 concurrent `get`s for the same host through a fake signer
	/// script and asserts it only runs once (P4).
	#[tokio::test]
	async fn concurrent_requests_for_the_same_host_sign_exactly_once() {
		use std::os::unix::fs::PermissionsExt;

		use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

		let dir = std::env::temp_dir().join(format!(
			"proxyscan-certfactory-test-{}-{}",
			std::process::id(),
			TEST_DIR_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
		));
		std::fs::create_dir_all(&dir).expect("create test cert dir");

		let key_pair = KeyPair::generate().expect("generate test key pair");
		let mut params = CertificateParams::default();
		let mut dn = DistinguishedName::new();
		dn.push(DnType::CommonName, "concurrent.test");
		params.distinguished_name = dn;
		params.not_before = time::OffsetDateTime::now_utc();
		params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(1);
		let cert = params.self_signed(&key_pair).expect("self-sign test leaf cert");

		std::fs::write(dir.join("fixture.crt"), cert.pem()).expect("write fixture cert");
		std::fs::write(dir.join("fixture.key"), key_pair.serialize_pem()).expect("write fixture key");

		let script_path = dir.join("sign.sh");
		std::fs::write(
			&script_path,
			"#!/bin/sh\nset -e\nhost=\"$1\"\necho \"$host\" >> calls.log\nsleep 0.2\ncp fixture.crt \"$host.crt\"\ncp fixture.key \"$host.key\"\n",
		)
		.expect("write fake signer script");
		std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).expect("chmod signer script");

		let signer = SignerConfig::new(dir.clone(), script_path);
		let factory = Arc::new(CertFactory::new(signer));

		let handles: Vec<_> = (0..8)
			.map(|_| {
				let factory = factory.clone();
				tokio::spawn(async move { factory.get("concurrent.test").await })
			})
			.collect();

		for handle in handles {
			handle.await.expect("task panicked").expect("cert mint failed");
		}

		let calls = std::fs::read_to_string(dir.join("calls.log")).unwrap_or_default();
		let call_count = calls.lines().filter(|l| !l.is_empty()).count();
		assert_eq!(call_count, 1, "signer must run exactly once for 8 concurrent requests to the same host");

		let _ = std::fs::remove_dir_all(&dir);
	}
}
