//! Invocation events delivered by the control plane.
//!
//! Payloads are classified once, when the invocation is received. HTTP
//! requests coming through an API gateway (payload format 1.0 or 2.0) become
//! [`HttpRequestEvent`]s; a couple of runtime-level events (ping, console
//! command) get their own variants and everything else is kept as
//! [`EventKind::Other`].

use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

/// Metadata the control plane sends alongside an invocation payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    /// Unix timestamp in milliseconds after which the invocation is killed.
    pub deadline_ms: Option<u64>,
    pub invoked_function_arn: Option<String>,
    pub trace_id: Option<String>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }
}

/// API gateway payload format the HTTP event arrived in. Responses are
/// shaped to match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadVersion {
    #[default]
    V1,
    V2,
}

/// Request headers keyed by lower-cased name, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(IndexMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// An HTTP request forwarded by an API gateway or load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequestEvent {
    pub method: String,
    pub path: String,
    /// Already url-encoded, without the leading `?`.
    pub query_string: String,
    pub headers: Headers,
    /// Decoded request body.
    pub body: Vec<u8>,
    /// Whether the body was base64 encoded on the wire.
    pub is_base64_encoded: bool,
    pub source_ip: Option<String>,
    pub payload_version: PayloadVersion,
}

impl HttpRequestEvent {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path plus query string, as the client requested it.
    pub fn uri(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }
}

/// Request to run a PHP console command (`php <command>`) in the
/// application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleCommandEvent {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    HttpRequest(HttpRequestEvent),
    /// Keep-alive ping used to keep the container warm.
    Ping,
    ConsoleCommand(ConsoleCommandEvent),
    Other,
}

/// One unit of work from the control plane. Lives for a single loop
/// iteration.
#[derive(Debug, Clone)]
pub struct InvocationEvent {
    context: InvocationContext,
    raw: Vec<u8>,
    kind: EventKind,
}

impl InvocationEvent {
    /// Classify a raw control-plane payload.
    pub fn from_payload(context: InvocationContext, raw: Vec<u8>) -> Result<Self> {
        let kind = parse_kind(&raw)?;
        Ok(Self { context, raw, kind })
    }

    pub fn new(context: InvocationContext, kind: EventKind) -> Self {
        Self {
            context,
            raw: Vec::new(),
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.context.request_id
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn http_request(&self) -> Option<&HttpRequestEvent> {
        match &self.kind {
            EventKind::HttpRequest(request) => Some(request),
            _ => None,
        }
    }

    pub fn payload_version(&self) -> PayloadVersion {
        self.http_request()
            .map(|request| request.payload_version)
            .unwrap_or_default()
    }
}

fn parse_kind(raw: &[u8]) -> Result<EventKind> {
    let value: Value = serde_json::from_slice(raw)?;

    if value.get("version").and_then(Value::as_str) == Some("2.0")
        && value.pointer("/requestContext/http").is_some()
    {
        let payload: ApiGatewayV2Payload = serde_json::from_value(value)?;
        return payload.into_event().map(EventKind::HttpRequest);
    }

    if value.get("httpMethod").is_some() {
        let payload: ApiGatewayV1Payload = serde_json::from_value(value)?;
        return payload.into_event().map(EventKind::HttpRequest);
    }

    if value.get("ping").and_then(Value::as_bool) == Some(true) {
        return Ok(EventKind::Ping);
    }

    if let Some(command) = value.get("php").and_then(Value::as_str) {
        return Ok(EventKind::ConsoleCommand(ConsoleCommandEvent {
            command: command.to_string(),
        }));
    }

    Ok(EventKind::Other)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayV1Payload {
    http_method: String,
    path: Option<String>,
    query_string_parameters: Option<IndexMap<String, String>>,
    multi_value_query_string_parameters: Option<IndexMap<String, Vec<String>>>,
    headers: Option<IndexMap<String, String>>,
    multi_value_headers: Option<IndexMap<String, Vec<String>>>,
    body: Option<String>,
    is_base64_encoded: Option<bool>,
    request_context: Option<V1RequestContext>,
}

#[derive(Debug, Deserialize)]
struct V1RequestContext {
    identity: Option<V1Identity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Identity {
    source_ip: Option<String>,
}

impl ApiGatewayV1Payload {
    fn into_event(self) -> Result<HttpRequestEvent> {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(parameters) = &self.multi_value_query_string_parameters {
            for (name, values) in parameters {
                for value in values {
                    query.append_pair(name, value);
                }
            }
        } else if let Some(parameters) = &self.query_string_parameters {
            for (name, value) in parameters {
                query.append_pair(name, value);
            }
        }

        let mut headers = Headers::new();
        if let Some(multi_value_headers) = self.multi_value_headers {
            for (name, values) in multi_value_headers {
                headers.insert(&name, join_header_values(&name, &values));
            }
        } else if let Some(single_value_headers) = self.headers {
            for (name, value) in single_value_headers {
                headers.insert(&name, value);
            }
        }

        let is_base64_encoded = self.is_base64_encoded.unwrap_or(false);

        Ok(HttpRequestEvent {
            method: self.http_method.to_ascii_uppercase(),
            path: self.path.unwrap_or_else(|| "/".to_string()),
            query_string: query.finish(),
            headers,
            body: decode_body(self.body, is_base64_encoded)?,
            is_base64_encoded,
            source_ip: self
                .request_context
                .and_then(|context| context.identity)
                .and_then(|identity| identity.source_ip),
            payload_version: PayloadVersion::V1,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayV2Payload {
    raw_path: Option<String>,
    raw_query_string: Option<String>,
    cookies: Option<Vec<String>>,
    headers: Option<IndexMap<String, String>>,
    body: Option<String>,
    is_base64_encoded: Option<bool>,
    request_context: V2RequestContext,
}

#[derive(Debug, Deserialize)]
struct V2RequestContext {
    http: V2Http,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Http {
    method: String,
    path: Option<String>,
    source_ip: Option<String>,
}

impl ApiGatewayV2Payload {
    fn into_event(self) -> Result<HttpRequestEvent> {
        let mut headers: Headers = self.headers.unwrap_or_default().into_iter().collect();
        if let Some(cookies) = self.cookies.filter(|cookies| !cookies.is_empty()) {
            headers.insert("cookie", cookies.join("; "));
        }

        let is_base64_encoded = self.is_base64_encoded.unwrap_or(false);
        let http = self.request_context.http;

        Ok(HttpRequestEvent {
            method: http.method.to_ascii_uppercase(),
            path: self
                .raw_path
                .or(http.path)
                .unwrap_or_else(|| "/".to_string()),
            query_string: self.raw_query_string.unwrap_or_default(),
            headers,
            body: decode_body(self.body, is_base64_encoded)?,
            is_base64_encoded,
            source_ip: http.source_ip,
            payload_version: PayloadVersion::V2,
        })
    }
}

fn join_header_values(name: &str, values: &[String]) -> String {
    if name.eq_ignore_ascii_case("cookie") {
        values.join("; ")
    } else {
        values.join(", ")
    }
}

fn decode_body(body: Option<String>, is_base64_encoded: bool) -> Result<Vec<u8>> {
    match body {
        None => Ok(Vec::new()),
        Some(body) if is_base64_encoded => Ok(STANDARD.decode(body)?),
        Some(body) => Ok(body.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventError;
    use serde_json::json;

    fn parse(payload: Value) -> InvocationEvent {
        InvocationEvent::from_payload(
            InvocationContext::new("req-1"),
            serde_json::to_vec(&payload).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_v1_http_event() {
        let event = parse(json!({
            "httpMethod": "post",
            "path": "/wp-admin/admin-ajax.php",
            "multiValueQueryStringParameters": {"action": ["heartbeat"], "tag": ["a b", "c"]},
            "multiValueHeaders": {
                "Content-Type": ["application/json"],
                "Cookie": ["a=1", "b=2"],
                "Accept": ["text/html", "application/json"]
            },
            "body": "eyJrIjoidiJ9",
            "isBase64Encoded": true,
            "requestContext": {"identity": {"sourceIp": "10.0.0.7"}}
        }));

        assert_eq!(event.id(), "req-1");
        let request = event.http_request().expect("http event");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/wp-admin/admin-ajax.php");
        assert_eq!(request.query_string, "action=heartbeat&tag=a+b&tag=c");
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert_eq!(request.headers.get("COOKIE"), Some("a=1; b=2"));
        assert_eq!(request.headers.get("accept"), Some("text/html, application/json"));
        assert_eq!(request.body, br#"{"k":"v"}"#);
        assert!(request.is_base64_encoded);
        assert_eq!(request.source_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(event.payload_version(), PayloadVersion::V1);
    }

    #[test]
    fn test_parse_v1_single_value_fields() {
        let event = parse(json!({
            "httpMethod": "GET",
            "path": null,
            "queryStringParameters": {"p": "42"},
            "headers": {"Host": "example.com"},
            "body": null,
            "isBase64Encoded": null
        }));

        let request = event.http_request().unwrap();
        assert_eq!(request.path, "/");
        assert_eq!(request.uri(), "/?p=42");
        assert_eq!(request.headers.get("host"), Some("example.com"));
        assert!(request.body.is_empty());
        assert!(!request.is_base64_encoded);
    }

    #[test]
    fn test_parse_v2_http_event() {
        let event = parse(json!({
            "version": "2.0",
            "rawPath": "/blog/hello-world/",
            "rawQueryString": "replytocom=3",
            "cookies": ["wordpress_test_cookie=WP", "session=abc"],
            "headers": {"Host": "example.com", "X-Forwarded-Proto": "https"},
            "body": "plain body",
            "isBase64Encoded": false,
            "requestContext": {"http": {"method": "GET", "path": "/ignored", "sourceIp": "1.2.3.4"}}
        }));

        let request = event.http_request().unwrap();
        assert_eq!(request.path, "/blog/hello-world/");
        assert_eq!(request.uri(), "/blog/hello-world/?replytocom=3");
        assert_eq!(
            request.headers.get("cookie"),
            Some("wordpress_test_cookie=WP; session=abc")
        );
        assert_eq!(request.headers.get("x-forwarded-proto"), Some("https"));
        assert_eq!(request.body, b"plain body");
        assert_eq!(request.source_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(event.payload_version(), PayloadVersion::V2);
    }

    #[test]
    fn test_parse_runtime_events() {
        assert_eq!(parse(json!({"ping": true})).kind(), &EventKind::Ping);
        assert_eq!(
            parse(json!({"php": "wp cron event run --due-now"})).kind(),
            &EventKind::ConsoleCommand(ConsoleCommandEvent {
                command: "wp cron event run --due-now".to_string()
            })
        );

        let other = parse(json!({"source": "aws.events"}));
        assert_eq!(other.kind(), &EventKind::Other);
        assert!(other.http_request().is_none());
        assert_eq!(other.raw(), br#"{"source":"aws.events"}"#);
    }

    #[test]
    fn test_parse_rejects_invalid_payloads() {
        let result =
            InvocationEvent::from_payload(InvocationContext::new("x"), b"not json".to_vec());
        assert!(matches!(result, Err(EventError::InvalidJson(_))));

        let result = InvocationEvent::from_payload(
            InvocationContext::new("x"),
            serde_json::to_vec(&json!({
                "httpMethod": "GET",
                "body": "%%%",
                "isBase64Encoded": true
            }))
            .unwrap(),
        );
        assert!(matches!(result, Err(EventError::InvalidBody(_))));
    }
}
