use super::record::{self, RecordType, RESPONDER};
use faas_common::HttpRequestEvent;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

const SERVER_SOFTWARE: &str = "faas-php-runtime";

/// A single FastCGI request for the worker. Built fresh per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastCgiRequest {
    script_filename: PathBuf,
    params: IndexMap<String, String>,
    stdin: Vec<u8>,
}

impl FastCgiRequest {
    pub fn new(script_filename: impl Into<PathBuf>) -> Self {
        let script_filename = script_filename.into();
        let mut params = IndexMap::new();
        params.insert(
            "SCRIPT_FILENAME".to_string(),
            script_filename.to_string_lossy().into_owned(),
        );

        Self {
            script_filename,
            params,
            stdin: Vec::new(),
        }
    }

    /// Build the CGI environment for an HTTP event executed by
    /// `script_filename`.
    pub fn from_http_event(
        event: &HttpRequestEvent,
        script_filename: &Path,
        document_root: &Path,
    ) -> Self {
        let headers = &event.headers;
        let https = headers
            .get("x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        let server_port = headers
            .get("x-forwarded-port")
            .map(str::to_string)
            .unwrap_or_else(|| if https { "443" } else { "80" }.to_string());
        let server_name = headers
            .get("host")
            .map(|host| host.split(':').next().unwrap_or(host).to_string())
            .unwrap_or_else(|| "localhost".to_string());
        let script_name = script_filename
            .strip_prefix(document_root)
            .map(|relative| format!("/{}", relative.to_string_lossy()))
            .unwrap_or_else(|_| {
                format!(
                    "/{}",
                    script_filename
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default()
                )
            });

        let mut request = Self::new(script_filename)
            .with_param("GATEWAY_INTERFACE", "FastCGI/1.0")
            .with_param("SERVER_SOFTWARE", SERVER_SOFTWARE)
            .with_param("SERVER_PROTOCOL", "HTTP/1.1")
            .with_param("SERVER_NAME", server_name)
            .with_param("SERVER_ADDR", "127.0.0.1")
            .with_param("SERVER_PORT", server_port.clone())
            .with_param(
                "REMOTE_ADDR",
                event.source_ip.as_deref().unwrap_or("127.0.0.1"),
            )
            .with_param("REMOTE_PORT", server_port)
            .with_param("REQUEST_METHOD", event.method.as_str())
            .with_param("REQUEST_URI", event.uri())
            .with_param("PATH_INFO", event.path.as_str())
            .with_param("QUERY_STRING", event.query_string.as_str())
            .with_param("DOCUMENT_ROOT", document_root.to_string_lossy())
            .with_param("SCRIPT_NAME", script_name)
            .with_param("CONTENT_LENGTH", event.body.len().to_string())
            .with_stdin(event.body.clone());

        if https {
            request.set_param("HTTPS", "on");
        }
        if let Some(content_type) = headers.get("content-type") {
            request.set_param("CONTENT_TYPE", content_type);
        }
        for (name, value) in headers.iter() {
            let name = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
            request.set_param(&name, value);
        }

        request
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        self.params.insert(name.to_string(), value.into());
    }

    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn script_filename(&self) -> &Path {
        &self.script_filename
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &IndexMap<String, String> {
        &self.params
    }

    pub fn stdin(&self) -> &[u8] {
        &self.stdin
    }

    /// Wire bytes for the whole request: BEGIN_REQUEST, PARAMS and STDIN.
    pub fn encode(&self, request_id: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.stdin.len() + 1024);

        record::write_record(
            &mut buf,
            RecordType::BeginRequest,
            request_id,
            &record::begin_request_body(RESPONDER, false),
        );

        let params = record::encode_params(
            self.params
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        record::write_stream(&mut buf, RecordType::Params, request_id, &params);
        record::write_stream(&mut buf, RecordType::Stdin, request_id, &self.stdin);

        buf
    }
}
