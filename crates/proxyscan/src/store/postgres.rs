use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use super::Store;
use crate::error::StoreError;
use crate::model::{
	CanonicalRequest, CanonicalResponse, CapturedExchange, ExchangeId, ParamMap,
};

/// Postgres-backed record store (§6.5). Each `save`/`update_response` is a
/// single `INSERT`/`UPDATE` statement, so the database's own row atomicity
/// gives the guarantee from §3 without an explicit transaction.
pub struct PgStore {
	pool: PgPool,
}

impl PgStore {
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let pool = PgPoolOptions::new()
			.max_connections(10)
			.connect(database_url)
			.await?;
		let store = PgStore { pool };
		store.init_schema().await?;
		Ok(store)
	}

	async fn init_schema(&self) -> Result<(), StoreError> {
		sqlx::query(
			r#"
            CREATE TABLE IF NOT EXISTS exchanges (
                id               TEXT PRIMARY KEY,
                method           TEXT NOT NULL,
                scheme           TEXT NOT NULL,
                host             TEXT NOT NULL,
                path             TEXT NOT NULL,
                get_params       JSONB NOT NULL,
                headers          JSONB NOT NULL,
                cookies          JSONB NOT NULL,
                post_params      JSONB NOT NULL,
                raw_body         BYTEA NOT NULL,
                timestamp        TIMESTAMPTZ NOT NULL,
                response_code    INTEGER,
                response_message TEXT,
                response_headers JSONB,
                response_body    BYTEA
            )
            "#,
		)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

fn params_to_json(params: &ParamMap) -> Result<serde_json::Value, StoreError> {
	Ok(serde_json::to_value(params)?)
}

fn json_to_params(value: serde_json::Value) -> Result<ParamMap, StoreError> {
	Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl Store for PgStore {
	async fn save(&self, exchange: CapturedExchange) -> Result<(), StoreError> {
		let req = &exchange.request;
		let result = sqlx::query(
			r#"
            INSERT INTO exchanges
                (id, method, scheme, host, path, get_params, headers, cookies, post_params, raw_body, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
		)
		.bind(&exchange.id.0)
		.bind(&req.method)
		.bind(&req.scheme)
		.bind(&req.host)
		.bind(&req.path)
		.bind(params_to_json(&req.query_params)?)
		.bind(params_to_json(&req.headers)?)
		.bind(params_to_json(&req.cookies)?)
		.bind(params_to_json(&req.form_params)?)
		.bind(&req.raw_body)
		.bind(exchange.captured_at)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(StoreError::Conflict(exchange.id));
		}
		Ok(())
	}

	async fn update_response(
		&self,
		id: &ExchangeId,
		response: CanonicalResponse,
	) -> Result<(), StoreError> {
		let result = sqlx::query(
			r#"
            UPDATE exchanges
            SET response_code = $2, response_message = $3, response_headers = $4, response_body = $5
            WHERE id = $1
            "#,
		)
		.bind(&id.0)
		.bind(response.status_code as i32)
		.bind(&response.status_text)
		.bind(params_to_json(&response.headers)?)
		.bind(&response.body)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			warn!(%id, "update_response on unknown exchange");
			return Err(StoreError::NotFound(id.clone()));
		}
		Ok(())
	}

	async fn get(&self, id: &ExchangeId) -> Result<CapturedExchange, StoreError> {
		let row = sqlx::query("SELECT * FROM exchanges WHERE id = $1")
			.bind(&id.0)
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| StoreError::NotFound(id.clone()))?;
		row_to_exchange(row)
	}

	async fn list_all(&self) -> Result<Vec<CapturedExchange>, StoreError> {
		let rows = sqlx::query("SELECT * FROM exchanges ORDER BY timestamp DESC")
			.fetch_all(&self.pool)
			.await?;
		let all = rows
			.into_iter()
			.map(row_to_exchange)
			.collect::<Result<Vec<_>, _>>()?;
		debug!(count = all.len(), "listed exchanges");
		Ok(all)
	}
}

fn row_to_exchange(row: sqlx::postgres::PgRow) -> Result<CapturedExchange, StoreError> {
	let response_code: Option<i32> = row.try_get("response_code")?;
	let response = match response_code {
		Some(code) => Some(CanonicalResponse {
			status_code: code as u16,
			status_text: row.try_get("response_message")?,
			headers: json_to_params(row.try_get("response_headers")?)?,
			body: row.try_get("response_body")?,
		}),
		None => None,
	};

	let captured_at: DateTime<Utc> = row.try_get("timestamp")?;
	Ok(CapturedExchange {
		id: ExchangeId(row.try_get("id")?),
		captured_at,
		request: CanonicalRequest {
			method: row.try_get("method")?,
			scheme: row.try_get("scheme")?,
			host: row.try_get("host")?,
			path: row.try_get("path")?,
			query_params: json_to_params(row.try_get("get_params")?)?,
			headers: json_to_params(row.try_get("headers")?)?,
			cookies: json_to_params(row.try_get("cookies")?)?,
			form_params: json_to_params(row.try_get("post_params")?)?,
			raw_body: row.try_get("raw_body")?,
		},
		response,
	})
}
