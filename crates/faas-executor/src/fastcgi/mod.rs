//! FastCGI bridge to the PHP-FPM worker.
//!
//! A request is written as BEGIN_REQUEST, a PARAMS stream and a STDIN stream;
//! the worker answers with STDOUT/STDERR streams and a final END_REQUEST.
//! STDOUT carries a CGI response (header block, blank line, body).

pub mod client;
pub mod record;
pub mod request;
pub mod response;

pub use client::FastCgiClient;
pub use request::FastCgiRequest;
pub use response::FastCgiResponse;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Transport failure while talking to the worker. A non-200 response from
/// the application is not an error.
#[derive(Error, Debug)]
pub enum FastCgiError {
    #[error("Failed to connect to FastCGI socket {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FastCGI protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed before the request completed")]
    UnexpectedEof,

    #[error("Timeout after {0:?} waiting for FastCGI response")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, FastCgiError>;

/// Anything that can execute a FastCGI request.
#[async_trait]
pub trait FastCgiBackend: Send + Sync {
    async fn handle(&self, request: FastCgiRequest) -> Result<FastCgiResponse>;
}
