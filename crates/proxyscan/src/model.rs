//! The canonical data model captured traffic is reduced to (§3 of the design).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, process-unique identifier for a captured exchange.
///
/// Monotonic within a process lifetime; callers must not parse or compare it
/// beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(pub String);

impl std::fmt::Display for ExchangeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ExchangeId {
	/// Mints the next id for this process. Sequential and opaque: callers
	/// must treat it as an unstructured string.
	pub fn next() -> Self {
		let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
		ExchangeId(format!("{n:016x}"))
	}
}

pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CanonicalRequest {
	pub method: String,
	pub scheme: String,
	pub host: String,
	pub path: String,
	pub query_params: ParamMap,
	pub headers: ParamMap,
	pub cookies: ParamMap,
	pub form_params: ParamMap,
	#[serde(with = "base64_bytes")]
	pub raw_body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CanonicalResponse {
	pub status_code: u16,
	pub status_text: String,
	pub headers: ParamMap,
	#[serde(with = "base64_bytes")]
	pub body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CapturedExchange {
	pub id: ExchangeId,
	pub captured_at: DateTime<Utc>,
	pub request: CanonicalRequest,
	pub response: Option<CanonicalResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
	None,
	Low,
	Medium,
	High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Finding {
	#[serde(rename = "type")]
	pub kind: String,
	pub description: String,
	pub severity: Severity,
}

/// A per-host leaf certificate minted by the certificate factory.
#[derive(Debug, Clone)]
pub struct HostCert {
	pub host: String,
	pub leaf_cert_chain: Vec<rustls_pki_types::CertificateDer<'static>>,
	pub private_key: rustls_pki_types::PrivateKeyDer<'static>,
	pub not_after: DateTime<Utc>,
}

mod base64_bytes {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(d)?;
		STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
	}
}
