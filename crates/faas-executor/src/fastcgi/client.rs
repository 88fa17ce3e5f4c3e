use super::record::{self, EndRequestBody, RecordType, REQUEST_COMPLETE};
use super::{FastCgiBackend, FastCgiError, FastCgiRequest, FastCgiResponse, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, instrument, warn};

/// One request per connection, so the id is always the same.
const REQUEST_ID: u16 = 1;

/// FastCGI client for a worker listening on a Unix domain socket.
#[derive(Debug, Clone)]
pub struct FastCgiClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl FastCgiClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send the request and wait for the complete response.
    #[instrument(skip(self, request), fields(script = %request.script_filename().display()))]
    pub async fn send(&self, request: &FastCgiRequest) -> Result<FastCgiResponse> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| FastCgiError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: &FastCgiRequest) -> Result<FastCgiResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| FastCgiError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        stream.write_all(&request.encode(REQUEST_ID)).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let end = loop {
            let record = record::read_record(&mut reader).await?;
            if record.header.request_id != REQUEST_ID {
                return Err(FastCgiError::Protocol(format!(
                    "unexpected request id {} in {:?} record",
                    record.header.request_id, record.header.record_type
                )));
            }

            match record.header.record_type {
                RecordType::Stdout => stdout.extend_from_slice(&record.content),
                RecordType::Stderr => stderr.extend_from_slice(&record.content),
                RecordType::EndRequest => break EndRequestBody::decode(&record.content)?,
                other => {
                    return Err(FastCgiError::Protocol(format!(
                        "unexpected {other:?} record from worker"
                    )))
                }
            }
        };

        if !stderr.is_empty() {
            warn!(stderr = %String::from_utf8_lossy(&stderr), "PHP-FPM wrote to stderr");
        }

        if end.protocol_status != REQUEST_COMPLETE {
            return Err(FastCgiError::Protocol(format!(
                "worker rejected the request: {}",
                describe_protocol_status(end.protocol_status)
            )));
        }

        debug!(
            app_status = end.app_status,
            bytes = stdout.len(),
            "FastCGI request completed"
        );

        FastCgiResponse::parse(&stdout)
    }
}

fn describe_protocol_status(status: u8) -> String {
    match status {
        record::CANT_MPX_CONN => "cannot multiplex connections".to_string(),
        record::OVERLOADED => "overloaded".to_string(),
        record::UNKNOWN_ROLE => "unknown role".to_string(),
        other => format!("protocol status {other}"),
    }
}

#[async_trait]
impl FastCgiBackend for FastCgiClient {
    async fn handle(&self, request: FastCgiRequest) -> Result<FastCgiResponse> {
        self.send(&request).await
    }
}
