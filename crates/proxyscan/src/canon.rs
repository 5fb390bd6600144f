//! Canonicalisation rules applied when an exchange is captured (§4.1).

use http::{HeaderMap, HeaderValue};

use crate::model::ParamMap;

/// Hop-by-hop headers the proxy must never forward upstream or record as
/// part of the forwarded request (§9 design notes).
pub const HOP_BY_HOP: &[&str] = &["proxy-connection", "proxy-authenticate", "proxy-authorization"];

pub fn is_hop_by_hop(name: &str) -> bool {
	HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Flattens a header map into a name -> comma-joined-value mapping, preserving
/// the original header name casing for the first occurrence of each name.
pub fn flatten_headers(headers: &HeaderMap) -> ParamMap {
	let mut out = ParamMap::new();
	let mut order: Vec<String> = Vec::new();
	for name in headers.keys() {
		let key = name.as_str().to_string();
		if !order.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
			order.push(key);
		}
	}
	for key in order {
		let joined = headers
			.get_all(key.as_str())
			.iter()
			.filter_map(|v: &HeaderValue| v.to_str().ok())
			.collect::<Vec<_>>()
			.join(", ");
		out.insert(key, joined);
	}
	out
}

/// Parses `name=value&...` query strings, first-occurrence wins.
pub fn parse_query_params(query: Option<&str>) -> ParamMap {
	let mut out = ParamMap::new();
	let Some(query) = query else { return out };
	for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
		out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
	}
	out
}

/// Parses the `Cookie` header: split on `;`, trim whitespace, first `=` is the
/// separator, first occurrence of a name wins, entries without `=` are
/// dropped silently. Quoted values are kept verbatim (not unquoted) — see the
/// open question in the design notes.
pub fn parse_cookies(headers: &ParamMap) -> ParamMap {
	let mut out = ParamMap::new();
	let Some(raw) = headers.iter().find_map(|(k, v)| k.eq_ignore_ascii_case("cookie").then_some(v))
	else {
		return out;
	};
	for pair in raw.split(';') {
		let pair = pair.trim();
		if pair.is_empty() {
			continue;
		}
		let Some((name, value)) = pair.split_once('=') else {
			continue;
		};
		let name = name.trim().to_string();
		if name.is_empty() {
			continue;
		}
		out.entry(name).or_insert_with(|| value.trim().to_string());
	}
	out
}

/// `Content-Type` matches `application/x-www-form-urlencoded` exactly after
/// trimming off any `;`-delimited parameters, case-insensitively.
pub fn is_form_urlencoded(content_type: Option<&str>) -> bool {
	let Some(ct) = content_type else { return false };
	let media_type = ct.split(';').next().unwrap_or("").trim();
	media_type.eq_ignore_ascii_case("application/x-www-form-urlencoded")
}

pub fn parse_form_params(body: &[u8]) -> ParamMap {
	let mut out = ParamMap::new();
	for (k, v) in url::form_urlencoded::parse(body) {
		out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_params_first_occurrence_wins() {
		let params = parse_query_params(Some("x=1&x=2&y=a"));
		assert_eq!(params.get("x").map(String::as_str), Some("1"));
		assert_eq!(params.get("y").map(String::as_str), Some("a"));
	}

	#[test]
	fn cookies_ignore_entries_without_equals() {
		let mut headers = ParamMap::new();
		headers.insert("Cookie".into(), "a=1; bare; b=2".into());
		let cookies = parse_cookies(&headers);
		assert_eq!(cookies.len(), 2);
		assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
		assert_eq!(cookies.get("b").map(String::as_str), Some("2"));
	}

	#[test]
	fn cookies_first_occurrence_wins_on_duplicate_name() {
		let mut headers = ParamMap::new();
		headers.insert("Cookie".into(), "dup=first; dup=second".into());
		let cookies = parse_cookies(&headers);
		assert_eq!(cookies.get("dup").map(String::as_str), Some("first"));
	}

	#[test]
	fn form_urlencoded_media_type_matches_exactly() {
		assert!(is_form_urlencoded(Some(
			"application/x-www-form-urlencoded; charset=utf-8"
		)));
		assert!(is_form_urlencoded(Some("application/x-www-form-urlencoded")));
		assert!(!is_form_urlencoded(Some("multipart/form-data")));
		assert!(!is_form_urlencoded(None));
	}

	#[test]
	fn hop_by_hop_is_case_insensitive() {
		assert!(is_hop_by_hop("Proxy-Connection"));
		assert!(is_hop_by_hop("proxy-authorization"));
		assert!(!is_hop_by_hop("Host"));
	}
}
