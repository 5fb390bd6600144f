//! The record store (C1, §4.1): canonicalises and persists captured
//! exchanges.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{CanonicalResponse, CapturedExchange, ExchangeId};

/// Durable storage for captured exchanges.
///
/// Implementations must provide the atomicity guarantees from §3: `save` and
/// `update_response` are each a single all-or-nothing write, and a concurrent
/// reader never observes a partially-updated exchange.
#[async_trait]
pub trait Store: Send + Sync {
	async fn save(&self, exchange: CapturedExchange) -> Result<(), StoreError>;
	async fn update_response(
		&self,
		id: &ExchangeId,
		response: CanonicalResponse,
	) -> Result<(), StoreError>;
	async fn get(&self, id: &ExchangeId) -> Result<CapturedExchange, StoreError>;
	/// Newest-first by `captured_at` (P7); ties break deterministically per
	/// backend but are not specified across backends.
	async fn list_all(&self) -> Result<Vec<CapturedExchange>, StoreError>;
}
