//! The interception engine (C3, §4.3): plain-HTTP forwarding and the
//! CONNECT-based MITM flow.

mod capture;
mod client;
mod listener;
mod mitm;
mod plain;

pub use listener::serve;

use std::sync::Arc;
use std::time::Duration;

use crate::certs::CertFactory;
use crate::store::Store;

/// Shared, read-only handles every accepted connection needs (§5 "Shared
/// mutable state").
pub struct ProxyInputs {
	pub store: Arc<dyn Store>,
	pub certs: Arc<CertFactory>,
	pub upstream_timeout: Duration,
	pub max_body_bytes: usize,
}
