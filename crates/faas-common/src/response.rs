use crate::event::PayloadVersion;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

/// HTTP response returned to the API gateway that forwarded the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    /// Lower-cased header name to every value sent for it, in order.
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, headers: IndexMap<String, Vec<String>>, body: Vec<u8>) -> Self {
        Self {
            status_code,
            headers,
            body,
        }
    }

    /// Response for paths the runtime refuses to forward to the worker.
    pub fn not_found() -> Self {
        let mut headers = IndexMap::new();
        headers.insert(
            "content-type".to_string(),
            vec!["text/plain; charset=UTF-8".to_string()],
        );
        Self::new(404, headers, b"Not Found".to_vec())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Gateway response document for the given payload format.
    pub fn to_payload(&self, version: PayloadVersion) -> Value {
        let body = STANDARD.encode(&self.body);

        match version {
            PayloadVersion::V1 => json!({
                "isBase64Encoded": true,
                "statusCode": self.status_code,
                "multiValueHeaders": self.headers,
                "body": body,
            }),
            PayloadVersion::V2 => {
                let mut headers = Map::new();
                let mut cookies = Vec::new();
                for (name, values) in &self.headers {
                    if name == "set-cookie" {
                        cookies.extend(values.iter().cloned());
                    } else {
                        headers.insert(name.clone(), Value::String(values.join(", ")));
                    }
                }

                json!({
                    "isBase64Encoded": true,
                    "statusCode": self.status_code,
                    "headers": headers,
                    "cookies": cookies,
                    "body": body,
                })
            }
        }
    }
}

/// Result of handling one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaResponse {
    Http(HttpResponse),
    Json(Value),
}

impl LambdaResponse {
    pub fn to_payload(&self, version: PayloadVersion) -> Value {
        match self {
            LambdaResponse::Http(response) => response.to_payload(version),
            LambdaResponse::Json(value) => value.clone(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            LambdaResponse::Http(response) => Some(response.status_code),
            LambdaResponse::Json(_) => None,
        }
    }
}

impl From<HttpResponse> for LambdaResponse {
    fn from(response: HttpResponse) -> Self {
        LambdaResponse::Http(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> HttpResponse {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), vec!["text/html".to_string()]);
        headers.insert(
            "set-cookie".to_string(),
            vec!["a=1; path=/".to_string(), "b=2; path=/".to_string()],
        );
        headers.insert(
            "vary".to_string(),
            vec!["Accept-Encoding".to_string(), "Cookie".to_string()],
        );
        HttpResponse::new(201, headers, b"<p>hi</p>".to_vec())
    }

    #[test]
    fn test_v1_payload_keeps_multi_value_headers() {
        let payload = response().to_payload(PayloadVersion::V1);

        assert_eq!(payload["statusCode"], 201);
        assert_eq!(payload["isBase64Encoded"], true);
        assert_eq!(payload["body"], "PHA+aGk8L3A+");
        assert_eq!(payload["multiValueHeaders"]["set-cookie"][1], "b=2; path=/");
        assert_eq!(payload["multiValueHeaders"]["vary"][0], "Accept-Encoding");
    }

    #[test]
    fn test_v2_payload_moves_cookies() {
        let payload = response().to_payload(PayloadVersion::V2);

        assert_eq!(payload["headers"]["vary"], "Accept-Encoding, Cookie");
        assert!(payload["headers"].get("set-cookie").is_none());
        assert_eq!(payload["cookies"][0], "a=1; path=/");
        assert_eq!(payload["cookies"][1], "b=2; path=/");
    }

    #[test]
    fn test_not_found_response() {
        let response = HttpResponse::not_found();
        assert_eq!(response.status_code, 404);
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=UTF-8"));
        assert_eq!(LambdaResponse::from(response).status_code(), Some(404));
    }

    #[test]
    fn test_json_response_is_passed_through() {
        let response = LambdaResponse::Json(json!({"exitCode": 0, "output": "ok"}));
        assert_eq!(response.to_payload(PayloadVersion::V2)["output"], "ok");
        assert_eq!(response.status_code(), None);
    }
}
