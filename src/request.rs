//! Immutable snapshot of an inbound request
//!
//! Built once per request and never mutated. The snapshot feeds both the
//! fast-path check (client identifier) and the oracle prompt (everything
//! else, serialized deterministically).

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

/// One inbound request, frozen for judgment.
///
/// Multi-valued query parameters collapse to the last occurrence; header
/// keys are lowercased on construction so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Opaque client identifier, compared by exact value (the peer
    /// address in the default deployment)
    pub client: String,
}

#[derive(Serialize)]
struct SummaryPayload<'a> {
    method: &'a str,
    path: &'a str,
    query_params: &'a BTreeMap<String, String>,
    headers: &'a BTreeMap<String, String>,
    body: String,
}

impl RequestContext {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        query: impl IntoIterator<Item = (String, String)>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Bytes,
        client: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: query.into_iter().collect(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body,
            client: client.into(),
        }
    }

    /// Deterministic, indented JSON rendering of the request, used as the
    /// oracle input block and the similarity-cache key. Key order is fixed
    /// by the sorted maps; the body is decoded lossily as UTF-8.
    pub fn summary(&self) -> String {
        let payload = SummaryPayload {
            method: &self.method,
            path: &self.path,
            query_params: &self.query,
            headers: &self.headers,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        };
        serde_json::to_string_pretty(&payload).expect("summary payload serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> RequestContext {
        RequestContext::new(
            "POST",
            "/login",
            vec![("user".to_string(), "admin".to_string())],
            vec![("Content-Type".to_string(), "application/json".to_string())],
            Bytes::from_static(b"{\"password\": \"hunter2\"}"),
            "203.0.113.9",
        )
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = sample();
        assert_eq!(
            ctx.headers.get("content-type"),
            Some(&"application/json".to_string())
        );
        assert!(ctx.headers.get("Content-Type").is_none());
    }

    #[test]
    fn test_multi_valued_query_collapses_to_last() {
        let ctx = RequestContext::new(
            "GET",
            "/search",
            vec![
                ("q".to_string(), "first".to_string()),
                ("q".to_string(), "second".to_string()),
            ],
            Vec::new(),
            Bytes::new(),
            "client",
        );
        assert_eq!(ctx.query.get("q"), Some(&"second".to_string()));
    }

    #[test]
    fn test_summary_is_deterministic() {
        let a = sample().summary();
        let b = sample().summary();
        assert_eq!(a, b);
        assert!(a.contains("\"method\": \"POST\""));
        assert!(a.contains("hunter2"));
    }

    #[test]
    fn test_summary_survives_non_utf8_body() {
        let ctx = RequestContext::new(
            "POST",
            "/upload",
            Vec::new(),
            Vec::new(),
            Bytes::from_static(&[0xff, 0xfe, 0x41]),
            "client",
        );
        let summary = ctx.summary();
        assert!(summary.contains("\"path\": \"/upload\""));
    }
}
