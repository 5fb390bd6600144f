//! The scan engine (C5, §4.5): a pure heuristic pass over one stored
//! exchange. No I/O beyond the single `store.get` the caller already paid for.

use std::sync::Arc;

use tracing::info;

use crate::error::ScanError;
use crate::model::{CapturedExchange, ExchangeId, Finding, ParamMap, Severity};
use crate::store::Store;

const SQLI_TOKENS: &[&str] = &["'", "\"", "--", ";", "union", "select", "insert", "delete", "update"];

pub struct ScanEngine {
	store: Arc<dyn Store>,
}

impl ScanEngine {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	pub async fn scan(&self, id: &ExchangeId) -> Result<Vec<Finding>, ScanError> {
		let exchange = self.store.get(id).await?;
		let findings = evaluate(&exchange);
		info!(%id, count = findings.len(), "scan");
		Ok(findings)
	}
}

/// Pure function of one exchange (P8). Rules run in the order tabulated in
/// §4.5; R2 and R4 each fire at most once.
fn evaluate(exchange: &CapturedExchange) -> Vec<Finding> {
	let req = &exchange.request;
	let url = format!("{}{}", req.path, query_suffix(&req.query_params));
	let url_lower = url.to_ascii_lowercase();

	let mut findings = Vec::new();

	// R1: insecure proxy header.
	if header_present(&req.headers, "proxy-connection") {
		findings.push(Finding {
			kind: "Insecure Header".to_string(),
			description: "request carries a Proxy-Connection header".to_string(),
			severity: Severity::Low,
		});
	}

	// R2: SQL injection token set in the URL (first match wins).
	if let Some(token) = first_sqli_token(&url_lower) {
		findings.push(Finding {
			kind: "SQL Injection".to_string(),
			description: format!("URL contains suspicious token `{token}`"),
			severity: Severity::High,
		});
	}

	// R3: XSS via form parameter.
	if let Some(name) = first_form_param_containing(&req.form_params, "<script>") {
		findings.push(Finding {
			kind: "XSS".to_string(),
			description: format!("form parameter `{name}` contains a <script> tag"),
			severity: Severity::Medium,
		});
	}

	// R4: SQL injection token set in a form parameter (first match wins).
	if let Some(name) = first_form_param_matching_sqli(&req.form_params) {
		findings.push(Finding {
			kind: "SQL Injection".to_string(),
			description: format!("form parameter `{name}` contains a suspicious token"),
			severity: Severity::High,
		});
	}

	if let Some(resp) = &exchange.response {
		// R5: information disclosure via X-Powered-By.
		if header_present(&resp.headers, "x-powered-by") {
			findings.push(Finding {
				kind: "Information Disclosure".to_string(),
				description: "response carries an X-Powered-By header".to_string(),
				severity: Severity::Low,
			});
		}

		// R6: missing X-XSS-Protection.
		if !header_present(&resp.headers, "x-xss-protection") {
			findings.push(Finding {
				kind: "Missing Security Header".to_string(),
				description: "response is missing X-XSS-Protection".to_string(),
				severity: Severity::Low,
			});
		}

		// R7: missing Content-Security-Policy.
		if !header_present(&resp.headers, "content-security-policy") {
			findings.push(Finding {
				kind: "Missing Security Header".to_string(),
				description: "response is missing Content-Security-Policy".to_string(),
				severity: Severity::Low,
			});
		}

		// R8: a more specific SQL injection pattern.
		if url_lower.contains("' or '1'='1") || url_lower.contains("1=1") {
			findings.push(Finding {
				kind: "SQL Injection".to_string(),
				description: "URL contains a tautology-style SQL injection pattern".to_string(),
				severity: Severity::High,
			});
		}

		// R9: a more specific XSS pattern.
		if url_lower.contains("<script>") || url_lower.contains("alert(") {
			findings.push(Finding {
				kind: "XSS".to_string(),
				description: "URL contains a script-injection pattern".to_string(),
				severity: Severity::Medium,
			});
		}
	}

	if findings.is_empty() {
		findings.push(Finding {
			kind: "None".to_string(),
			description: "no obvious vulnerabilities detected".to_string(),
			severity: Severity::None,
		});
	}

	findings
}

/// Rebuilds a `?`-prefixed query string from the decoded param map for
/// pattern matching, joining `key=value` pairs literally rather than
/// percent-encoding them — the SQLi/XSS tokens these rules look for (`'`,
/// `"`, `;`, `=`) must survive intact, or they never match.
fn query_suffix(query_params: &ParamMap) -> String {
	if query_params.is_empty() {
		return String::new();
	}
	let joined = query_params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
	format!("?{joined}")
}

fn header_present(headers: &ParamMap, name: &str) -> bool {
	headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

fn first_sqli_token(haystack_lower: &str) -> Option<&'static str> {
	SQLI_TOKENS.iter().copied().find(|token| haystack_lower.contains(token))
}

fn first_form_param_containing<'a>(form_params: &'a ParamMap, needle: &str) -> Option<&'a str> {
	form_params
		.iter()
		.find(|(_, v)| v.to_ascii_lowercase().contains(needle))
		.map(|(k, _)| k.as_str())
}

fn first_form_param_matching_sqli(form_params: &ParamMap) -> Option<&str> {
	form_params
		.iter()
		.find(|(_, v)| first_sqli_token(&v.to_ascii_lowercase()).is_some())
		.map(|(k, _)| k.as_str())
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::model::{CanonicalRequest, CanonicalResponse};

	fn base_request(path: &str) -> CanonicalRequest {
		CanonicalRequest {
			method: "GET".to_string(),
			scheme: "http".to_string(),
			host: "example.test".to_string(),
			path: path.to_string(),
			query_params: ParamMap::new(),
			headers: ParamMap::new(),
			cookies: ParamMap::new(),
			form_params: ParamMap::new(),
			raw_body: Vec::new(),
		}
	}

	fn exchange_with(request: CanonicalRequest, response: Option<CanonicalResponse>) -> CapturedExchange {
		CapturedExchange {
			id: ExchangeId::next(),
			captured_at: Utc::now(),
			request,
			response,
		}
	}

	#[test]
	fn no_vulnerabilities_falls_back_to_none_finding() {
		let exchange = exchange_with(base_request("/safe"), None);
		let findings = evaluate(&exchange);
		assert_eq!(findings.len(), 1);
		assert_eq!(findings[0].severity, Severity::None);
	}

	#[test]
	fn r1_fires_on_proxy_connection_header() {
		let mut req = base_request("/");
		req.headers.insert("Proxy-Connection".to_string(), "keep-alive".to_string());
		let findings = evaluate(&exchange_with(req, None));
		assert!(findings.iter().any(|f| f.kind == "Insecure Header"));
	}

	#[test]
	fn r2_fires_once_on_first_sqli_token_in_url() {
		let req = base_request("/items");
		let mut params = ParamMap::new();
		params.insert("id".to_string(), "1' OR '1'='1".to_string());
		let mut req = req;
		req.query_params = params;
		let findings = evaluate(&exchange_with(req, None));
		let sqli_count = findings.iter().filter(|f| f.kind == "SQL Injection").count();
		assert_eq!(sqli_count, 1);
	}

	#[test]
	fn r3_fires_on_script_tag_in_form_param() {
		let mut req = base_request("/submit");
		req.form_params.insert("comment".to_string(), "<script>evil()</script>".to_string());
		let findings = evaluate(&exchange_with(req, None));
		assert!(findings.iter().any(|f| f.kind == "XSS"));
	}

	#[test]
	fn r5_through_r7_only_apply_with_a_response() {
		let req = base_request("/");
		let findings_no_response = evaluate(&exchange_with(req.clone(), None));
		assert!(!findings_no_response.iter().any(|f| f.kind == "Missing Security Header"));

		let resp = CanonicalResponse {
			status_code: 200,
			status_text: "OK".to_string(),
			headers: ParamMap::new(),
			body: Vec::new(),
		};
		let findings_with_response = evaluate(&exchange_with(req, Some(resp)));
		assert!(
			findings_with_response
				.iter()
				.filter(|f| f.kind == "Missing Security Header")
				.count()
				>= 2
		);
	}

	#[test]
	fn r5_does_not_fire_when_x_powered_by_absent() {
		let req = base_request("/");
		let mut headers = ParamMap::new();
		headers.insert("Content-Security-Policy".to_string(), "default-src 'self'".to_string());
		headers.insert("X-XSS-Protection".to_string(), "1; mode=block".to_string());
		let resp = CanonicalResponse {
			status_code: 200,
			status_text: "OK".to_string(),
			headers,
			body: Vec::new(),
		};
		let findings = evaluate(&exchange_with(req, Some(resp)));
		assert!(!findings.iter().any(|f| f.kind == "Information Disclosure"));
		assert_eq!(findings.len(), 1);
		assert_eq!(findings[0].severity, Severity::None);
	}
}
