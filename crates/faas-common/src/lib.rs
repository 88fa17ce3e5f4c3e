// Re-export dependencies used in public interfaces of common types

pub use indexmap::IndexMap;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
use thiserror::Error;

pub mod event;
pub mod response;

pub use event::{
    ConsoleCommandEvent, EventKind, Headers, HttpRequestEvent, InvocationContext,
    InvocationEvent, PayloadVersion,
};
pub use response::{HttpResponse, LambdaResponse};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid event payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid base64 request body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, EventError>;

/// Error payload posted to the control plane for a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationError {
    pub error_type: String,
    pub error_message: String,
}

impl InvocationError {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}
