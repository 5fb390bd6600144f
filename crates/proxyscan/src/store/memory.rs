use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use super::Store;
use crate::error::StoreError;
use crate::model::{CanonicalResponse, CapturedExchange, ExchangeId};

/// In-process store for tests and for running without a database (§4.7).
/// Honours the same save/update_response/get/list_all atomicity contract as
/// the Postgres-backed store: every mutation replaces the whole map entry
/// under a single lock acquisition, so a reader never observes a half
/// written exchange.
#[derive(Default)]
pub struct MemoryStore {
	exchanges: Mutex<BTreeMap<ExchangeId, CapturedExchange>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn save(&self, exchange: CapturedExchange) -> Result<(), StoreError> {
		let mut guard = self.exchanges.lock().expect("store mutex poisoned");
		if guard.contains_key(&exchange.id) {
			return Err(StoreError::Conflict(exchange.id));
		}
		guard.insert(exchange.id.clone(), exchange);
		Ok(())
	}

	async fn update_response(
		&self,
		id: &ExchangeId,
		response: CanonicalResponse,
	) -> Result<(), StoreError> {
		let mut guard = self.exchanges.lock().expect("store mutex poisoned");
		match guard.get_mut(id) {
			Some(exchange) => {
				exchange.response = Some(response);
				Ok(())
			},
			None => {
				warn!(%id, "update_response on unknown exchange");
				Err(StoreError::NotFound(id.clone()))
			},
		}
	}

	async fn get(&self, id: &ExchangeId) -> Result<CapturedExchange, StoreError> {
		let guard = self.exchanges.lock().expect("store mutex poisoned");
		guard
			.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(id.clone()))
	}

	async fn list_all(&self) -> Result<Vec<CapturedExchange>, StoreError> {
		let guard = self.exchanges.lock().expect("store mutex poisoned");
		let mut all: Vec<_> = guard.values().cloned().collect();
		all.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
		Ok(all)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::CanonicalRequest;
	use chrono::Utc;

	fn req() -> CanonicalRequest {
		CanonicalRequest {
			method: "GET".into(),
			scheme: "http".into(),
			host: "example.test".into(),
			path: "/".into(),
			query_params: Default::default(),
			headers: Default::default(),
			cookies: Default::default(),
			form_params: Default::default(),
			raw_body: vec![],
		}
	}

	fn exchange(id: &str, captured_at: chrono::DateTime<Utc>) -> CapturedExchange {
		CapturedExchange {
			id: ExchangeId(id.into()),
			captured_at,
			request: req(),
			response: None,
		}
	}

	#[tokio::test]
	async fn save_then_get_round_trips() {
		let store = MemoryStore::new();
		let id = ExchangeId("1".into());
		store.save(exchange("1", Utc::now())).await.unwrap();
		let got = store.get(&id).await.unwrap();
		assert_eq!(got.id, id);
		assert!(got.response.is_none());
	}

	#[tokio::test]
	async fn save_rejects_duplicate_id() {
		let store = MemoryStore::new();
		store.save(exchange("1", Utc::now())).await.unwrap();
		let err = store.save(exchange("1", Utc::now())).await.unwrap_err();
		assert!(matches!(err, StoreError::Conflict(_)));
	}

	#[tokio::test]
	async fn update_response_on_unknown_id_fails() {
		let store = MemoryStore::new();
		let response = CanonicalResponse {
			status_code: 200,
			status_text: "OK".into(),
			headers: Default::default(),
			body: vec![],
		};
		let err = store
			.update_response(&ExchangeId("missing".into()), response)
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::NotFound(_)));
	}

	#[tokio::test]
	async fn list_all_orders_newest_first() {
		let store = MemoryStore::new();
		let t0 = Utc::now();
		store
			.save(exchange("a", t0 - chrono::Duration::seconds(10)))
			.await
			.unwrap();
		store.save(exchange("b", t0)).await.unwrap();
		store
			.save(exchange("c", t0 - chrono::Duration::seconds(5)))
			.await
			.unwrap();
		let all = store.list_all().await.unwrap();
		let ids: Vec<_> = all.iter().map(|e| e.id.0.clone()).collect();
		assert_eq!(ids, vec!["b", "c", "a"]);
	}
}
