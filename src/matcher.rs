//! Request matching logic.
//!
//! Declarations are tried in configuration order and the first one that
//! satisfies method, URL, query, headers and body wins. A match consumes one
//! step of the declaration's response sequence.

use crate::declaration::{Declaration, HeaderList, RequestPattern, ResponseSpec};
use crate::store::ConfigurationSnapshot;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Normalized request handed over by the transport.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Merge parameters from a raw (undecoded) query string.
    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query.extend(parse_query_string(query));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// A successful match.
#[derive(Debug)]
pub struct MatchResult<'a> {
    pub declaration: &'a Declaration,
    /// The response at `sequence_index`
    pub response: &'a ResponseSpec,
    /// Index consumed from the declaration's sequence
    pub sequence_index: usize,
}

/// No declaration matched; explains the nearest miss.
#[derive(Debug, Clone, Serialize)]
pub struct NoMatch {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest: Option<NearMiss>,
}

/// The declaration that satisfied the most criteria.
#[derive(Debug, Clone, Serialize)]
pub struct NearMiss {
    pub declaration_id: String,
    pub matched: Vec<String>,
    pub mismatched: Vec<Mismatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// `method`, `url`, `query.<name>`, `headers.<name>` or `post`
    pub attribute: String,
    pub expected: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl fmt::Display for NoMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no stub matches {} {}", self.method, self.path)?;
        if let Some(closest) = &self.closest {
            let attributes: Vec<&str> = closest
                .mismatched
                .iter()
                .map(|m| m.attribute.as_str())
                .collect();
            write!(
                f,
                " (closest: '{}', differs in {})",
                closest.declaration_id,
                attributes.join(", ")
            )?;
        }
        Ok(())
    }
}

impl NoMatch {
    fn diagnose(snapshot: &ConfigurationSnapshot, request: &InboundRequest) -> Self {
        let mut closest: Option<NearMiss> = None;

        for declaration in snapshot.declarations() {
            let evaluation = declaration.request().evaluate(request, true);
            let better = closest
                .as_ref()
                .map_or(true, |best| evaluation.matched.len() > best.matched.len());
            if better {
                closest = Some(NearMiss {
                    declaration_id: declaration.id().to_string(),
                    matched: evaluation.matched,
                    mismatched: evaluation.mismatched,
                });
            }
        }

        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            closest,
        }
    }
}

/// Find the first matching declaration and consume its next response.
pub fn find_match<'a>(
    snapshot: &'a ConfigurationSnapshot,
    request: &InboundRequest,
) -> Result<MatchResult<'a>, NoMatch> {
    for (slot, declaration) in snapshot.declarations().iter().enumerate() {
        if declaration.request().matches(request) {
            let sequence_index = snapshot.cursor().advance(slot);
            return Ok(MatchResult {
                declaration,
                response: &declaration.responses()[sequence_index],
                sequence_index,
            });
        }
    }

    Err(NoMatch::diagnose(snapshot, request))
}

/// The declaration `request` would match, without touching any cursor.
pub fn select<'a>(
    snapshot: &'a ConfigurationSnapshot,
    request: &InboundRequest,
) -> Option<&'a Declaration> {
    snapshot
        .declarations()
        .iter()
        .find(|declaration| declaration.request().matches(request))
}

#[derive(Debug, Default)]
struct Evaluation {
    exhaustive: bool,
    matched: Vec<String>,
    mismatched: Vec<Mismatch>,
}

impl Evaluation {
    fn record(
        &mut self,
        ok: bool,
        attribute: impl FnOnce() -> String,
        expected: impl FnOnce() -> String,
        actual: Option<&str>,
    ) {
        if ok {
            if self.exhaustive {
                self.matched.push(attribute());
            }
        } else {
            self.mismatched.push(Mismatch {
                attribute: attribute(),
                expected: expected(),
                actual: actual.map(str::to_string),
            });
        }
    }

    fn done(&self) -> bool {
        !self.exhaustive && !self.mismatched.is_empty()
    }
}

impl RequestPattern {
    /// Whether `request` satisfies every criterion of this pattern.
    pub fn matches(&self, request: &InboundRequest) -> bool {
        self.evaluate(request, false).mismatched.is_empty()
    }

    fn evaluate(&self, request: &InboundRequest, exhaustive: bool) -> Evaluation {
        let mut eval = Evaluation {
            exhaustive,
            ..Evaluation::default()
        };

        let method = request.method.to_ascii_uppercase();
        eval.record(
            self.methods.contains(&method),
            || "method".to_string(),
            || self.methods.join(", "),
            Some(method.as_str()),
        );
        if eval.done() {
            return eval;
        }

        eval.record(
            self.url.matches(&request.path),
            || "url".to_string(),
            || self.url.as_str().to_string(),
            Some(request.path.as_str()),
        );
        if eval.done() {
            return eval;
        }

        for (name, expected) in &self.query {
            let actual = request.query.get(name).map(String::as_str);
            eval.record(
                actual.is_some_and(|value| expected.matches(value)),
                || format!("query.{}", name),
                || expected.as_str().to_string(),
                actual,
            );
            if eval.done() {
                return eval;
            }
        }

        for (name, expected) in &self.headers {
            let actual = request.headers.get(name);
            eval.record(
                actual.is_some_and(|value| expected.matches(value)),
                || format!("headers.{}", name.to_ascii_lowercase()),
                || expected.as_str().to_string(),
                actual,
            );
            if eval.done() {
                return eval;
            }
        }

        if let Some(expected) = &self.post {
            let body = String::from_utf8_lossy(&request.body);
            let body = body.trim();
            eval.record(
                expected.matches(body),
                || "post".to_string(),
                || expected.as_str().to_string(),
                Some(body),
            );
        }

        eval
    }
}

/// Parse a query string into key-value pairs. Later duplicates win.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.trim_start_matches('?').split('&') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                params.insert(percent_decode(key, true), percent_decode(value, true));
            }
            None => {
                params.insert(percent_decode(part, true), String::new());
            }
        }
    }

    params
}

/// Decode `%XX` escapes in a request path. `+` stays literal.
pub fn decode_path(path: &str) -> String {
    percent_decode(path, false)
}

/// Decode `%XX` escapes, and `+` as space in form encoding; malformed
/// escapes pass through.
fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DeclarationBuilder, RequestPatternBuilder, ResponseSpecBuilder};

    fn respond(status: u16, body: &str) -> ResponseSpec {
        ResponseSpecBuilder::new()
            .status(status)
            .body(body)
            .build()
            .unwrap()
    }

    fn stub(id: &str, request: RequestPatternBuilder, responses: Vec<ResponseSpec>) -> Declaration {
        DeclarationBuilder::new(id)
            .request(request.build().unwrap())
            .responses(responses)
            .build()
            .unwrap()
    }

    fn snapshot(declarations: Vec<Declaration>) -> ConfigurationSnapshot {
        ConfigurationSnapshot::new(declarations)
    }

    #[test]
    fn test_sequence_advances_and_saturates() {
        let snapshot = snapshot(vec![stub(
            "invoice",
            RequestPatternBuilder::new("/invoice").method("GET"),
            vec![respond(200, "OK"), respond(500, "FAIL")],
        )]);
        let request = InboundRequest::new("GET", "/invoice");

        let first = find_match(&snapshot, &request).unwrap();
        assert_eq!(first.response.status(), 200);
        assert_eq!(first.sequence_index, 0);

        let second = find_match(&snapshot, &request).unwrap();
        assert_eq!(second.response.status(), 500);
        assert_eq!(second.sequence_index, 1);

        let third = find_match(&snapshot, &request).unwrap();
        assert_eq!(third.response.status(), 500);
        assert_eq!(third.sequence_index, 1);
    }

    #[test]
    fn test_exact_and_regex_url() {
        let snapshot = snapshot(vec![
            stub(
                "exact",
                RequestPatternBuilder::new("/api/users").method("GET"),
                vec![respond(200, "users")],
            ),
            stub(
                "regex",
                RequestPatternBuilder::new(r"^/api/users/\d+$").method("GET"),
                vec![respond(200, "user")],
            ),
        ]);

        let result = find_match(&snapshot, &InboundRequest::new("GET", "/api/users")).unwrap();
        assert_eq!(result.declaration.id(), "exact");

        let result = find_match(&snapshot, &InboundRequest::new("GET", "/api/users/42")).unwrap();
        assert_eq!(result.declaration.id(), "regex");

        assert!(find_match(&snapshot, &InboundRequest::new("GET", "/api/posts")).is_err());
    }

    #[test]
    fn test_method_matching() {
        let snapshot = snapshot(vec![stub(
            "method",
            RequestPatternBuilder::new("/api/users").methods(["GET", "POST"]),
            vec![respond(200, "ok")],
        )]);

        assert!(find_match(&snapshot, &InboundRequest::new("get", "/api/users")).is_ok());
        assert!(find_match(&snapshot, &InboundRequest::new("POST", "/api/users")).is_ok());
        assert!(find_match(&snapshot, &InboundRequest::new("DELETE", "/api/users")).is_err());
    }

    #[test]
    fn test_query_subset_semantics() {
        let snapshot = snapshot(vec![stub(
            "active",
            RequestPatternBuilder::new("/invoice")
                .method("GET")
                .query("status", "active"),
            vec![respond(200, "active")],
        )]);

        let request = InboundRequest::new("GET", "/invoice")
            .with_query_string("status=active&type=full");
        assert!(find_match(&snapshot, &request).is_ok());

        let request = InboundRequest::new("GET", "/invoice").with_query_string("type=full");
        assert!(find_match(&snapshot, &request).is_err());

        let request = InboundRequest::new("GET", "/invoice").with_query_string("status=inactive");
        assert!(find_match(&snapshot, &request).is_err());
    }

    #[test]
    fn test_query_regex_value() {
        let snapshot = snapshot(vec![stub(
            "paged",
            RequestPatternBuilder::new("/items").method("GET").query("page", r"\d+"),
            vec![respond(200, "page")],
        )]);

        let request = InboundRequest::new("GET", "/items").with_query("page", "12");
        assert!(find_match(&snapshot, &request).is_ok());
        let request = InboundRequest::new("GET", "/items").with_query("page", "last");
        assert!(find_match(&snapshot, &request).is_err());
    }

    #[test]
    fn test_header_matching_is_case_insensitive() {
        let snapshot = snapshot(vec![stub(
            "json",
            RequestPatternBuilder::new("/invoice")
                .method("POST")
                .header("content-type", "application/json"),
            vec![respond(201, "created")],
        )]);

        let request = InboundRequest::new("POST", "/invoice")
            .with_header("Content-Type", "application/json")
            .with_header("X-Extra", "ignored");
        assert!(find_match(&snapshot, &request).is_ok());

        let request = InboundRequest::new("POST", "/invoice");
        assert!(find_match(&snapshot, &request).is_err());
    }

    #[test]
    fn test_body_matching() {
        let snapshot = snapshot(vec![
            stub(
                "literal",
                RequestPatternBuilder::new("/invoice/123")
                    .method("PUT")
                    .post(r#"{"name": "milk"}"#),
                vec![respond(200, "literal")],
            ),
            stub(
                "pattern",
                RequestPatternBuilder::new("/invoice/123")
                    .method("PUT")
                    .post(r#"\{"name": ".*"\}"#),
                vec![respond(200, "pattern")],
            ),
        ]);

        let request =
            InboundRequest::new("PUT", "/invoice/123").with_body("{\"name\": \"milk\"}\n");
        let result = find_match(&snapshot, &request).unwrap();
        assert_eq!(result.declaration.id(), "literal");

        let request = InboundRequest::new("PUT", "/invoice/123").with_body("{\"name\": \"bread\"}");
        let result = find_match(&snapshot, &request).unwrap();
        assert_eq!(result.declaration.id(), "pattern");

        let request = InboundRequest::new("PUT", "/invoice/123").with_body("nope");
        assert!(find_match(&snapshot, &request).is_err());
    }

    #[test]
    fn test_configuration_order_wins_over_specificity() {
        let snapshot = snapshot(vec![
            stub(
                "broad",
                RequestPatternBuilder::new("/invoice").method("GET"),
                vec![respond(200, "broad")],
            ),
            stub(
                "specific",
                RequestPatternBuilder::new("/invoice")
                    .method("GET")
                    .header("content-type", "application/json"),
                vec![respond(200, "specific")],
            ),
        ]);

        let request =
            InboundRequest::new("GET", "/invoice").with_header("content-type", "application/json");
        let result = find_match(&snapshot, &request).unwrap();
        assert_eq!(result.declaration.id(), "broad");
    }

    #[test]
    fn test_selection_independent_of_cursor() {
        let snapshot = snapshot(vec![
            stub(
                "seq",
                RequestPatternBuilder::new("/seq").method("GET"),
                vec![respond(200, "a"), respond(201, "b"), respond(202, "c")],
            ),
            stub(
                "other",
                RequestPatternBuilder::new("/seq").method("GET"),
                vec![respond(418, "other")],
            ),
        ]);
        let request = InboundRequest::new("GET", "/seq");

        for _ in 0..5 {
            assert_eq!(find_match(&snapshot, &request).unwrap().declaration.id(), "seq");
        }
        assert_eq!(select(&snapshot, &request).unwrap().id(), "seq");
        assert_eq!(snapshot.cursor().peek("seq"), Some(2));
    }

    #[test]
    fn test_select_does_not_advance() {
        let snapshot = snapshot(vec![stub(
            "seq",
            RequestPatternBuilder::new("/seq").method("GET"),
            vec![respond(200, "a"), respond(201, "b")],
        )]);
        let request = InboundRequest::new("GET", "/seq");
        assert!(select(&snapshot, &request).is_some());
        assert_eq!(snapshot.cursor().peek("seq"), Some(0));
    }

    #[test]
    fn test_no_match_reports_closest_declaration() {
        let snapshot = snapshot(vec![
            stub(
                "other",
                RequestPatternBuilder::new("/other").method("DELETE"),
                vec![respond(200, "x")],
            ),
            stub(
                "invoice",
                RequestPatternBuilder::new("/invoice")
                    .method("GET")
                    .query("status", "active"),
                vec![respond(200, "x")],
            ),
        ]);

        let request = InboundRequest::new("GET", "/invoice").with_query("status", "closed");
        let no_match = find_match(&snapshot, &request).unwrap_err();

        let closest = no_match.closest.as_ref().unwrap();
        assert_eq!(closest.declaration_id, "invoice");
        assert_eq!(closest.matched, vec!["method", "url"]);
        assert_eq!(
            closest.mismatched,
            vec![Mismatch {
                attribute: "query.status".to_string(),
                expected: "active".to_string(),
                actual: Some("closed".to_string()),
            }]
        );
        assert!(no_match.to_string().contains("query.status"));
    }

    #[test]
    fn test_no_match_on_empty_snapshot() {
        let snapshot = snapshot(Vec::new());
        let no_match = find_match(&snapshot, &InboundRequest::new("GET", "/")).unwrap_err();
        assert!(no_match.closest.is_none());
        assert_eq!(no_match.to_string(), "no stub matches GET /");
    }

    #[test]
    fn test_failed_match_leaves_cursors_alone() {
        let snapshot = snapshot(vec![stub(
            "seq",
            RequestPatternBuilder::new("/seq").method("GET"),
            vec![respond(200, "a"), respond(201, "b")],
        )]);
        assert!(find_match(&snapshot, &InboundRequest::new("POST", "/seq")).is_err());
        assert_eq!(snapshot.cursor().peek("seq"), Some(0));
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));

        let params = parse_query_string("name=John%20Doe&city=S%C3%A3o+Paulo&flag");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("city"), Some(&"São Paulo".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_percent_decode_malformed_passthrough() {
        assert_eq!(percent_decode("100%", true), "100%");
        assert_eq!(percent_decode("%zz", true), "%zz");
        assert_eq!(percent_decode("%4", true), "%4");
    }

    #[test]
    fn test_decoded_path_matches_declared_url() {
        assert_eq!(decode_path("/a%20b"), "/a b");
        assert_eq!(decode_path("/c++/S%C3%A3o"), "/c++/São");

        let snapshot = snapshot(vec![stub(
            "spaced",
            RequestPatternBuilder::new("/a b").method("GET"),
            vec![respond(200, "spaced")],
        )]);
        let request = InboundRequest::new("GET", decode_path("/a%20b"));
        assert!(find_match(&snapshot, &request).is_ok());
    }
}
