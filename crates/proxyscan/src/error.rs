//! Error taxonomy (§7). Each component owns a narrow error enum; the control
//! API is the single place that maps these onto HTTP status codes.

use thiserror::Error;

use crate::model::ExchangeId;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("storage unavailable: {0}")]
	StorageUnavailable(#[from] sqlx::Error),
	#[error("exchange not found: {0}")]
	NotFound(ExchangeId),
	#[error("exchange already exists: {0}")]
	Conflict(ExchangeId),
	#[error("field could not be encoded: {0}")]
	Serialisation(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CertError {
	#[error("signer exited with failure for host {host}: {detail}")]
	SignerFailed { host: String, detail: String },
	#[error("failed to load certificate material for host {host}: {detail}")]
	LoadFailed { host: String, detail: String },
	#[error("certificate for host {host} failed validation: {reason}")]
	InvalidCertificate { host: String, reason: String },
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProxyError {
	#[error("client disconnected")]
	ClientDisconnect,
	#[error("upstream error: {0}")]
	UpstreamError(String),
	#[error("upstream request timed out")]
	UpstreamTimeout,
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Cert(#[from] CertError),
	#[error("request body exceeded the configured limit")]
	BodyTooLarge,
}

#[derive(Debug, Error)]
pub enum ReplayError {
	#[error("exchange not found: {0}")]
	NotFound(ExchangeId),
	#[error("exchange is missing scheme or host and cannot be replayed")]
	Malformed,
	#[error("upstream error: {0}")]
	UpstreamError(String),
	#[error("storage unavailable: {0}")]
	StorageUnavailable(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
	#[error("exchange not found: {0}")]
	NotFound(ExchangeId),
	#[error("storage unavailable: {0}")]
	StorageUnavailable(String),
}

impl From<StoreError> for ReplayError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::NotFound(id) => ReplayError::NotFound(id),
			other => ReplayError::StorageUnavailable(other.to_string()),
		}
	}
}

impl From<StoreError> for ScanError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::NotFound(id) => ScanError::NotFound(id),
			other => ScanError::StorageUnavailable(other.to_string()),
		}
	}
}
