//! Client for the platform's runtime (control-plane) API.

use async_trait::async_trait;
use faas_common::{InvocationContext, InvocationError};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

const API_VERSION: &str = "2018-06-01";

const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
const FUNCTION_ARN_HEADER: &str = "lambda-runtime-invoked-function-arn";
const TRACE_ID_HEADER: &str = "lambda-runtime-trace-id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request to the runtime API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Runtime API returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Runtime API response is missing the request id header")]
    MissingRequestId,
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// An invocation handed out by the control plane.
#[derive(Debug, Clone)]
pub struct NextInvocation {
    pub context: InvocationContext,
    pub payload: Vec<u8>,
}

/// The control-plane operations the runtime loop depends on.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Block until the next invocation is available.
    async fn next_invocation(&self) -> Result<NextInvocation>;

    async fn post_response(&self, request_id: &str, response: &Value) -> Result<()>;

    async fn post_error(&self, request_id: &str, error: &InvocationError) -> Result<()>;

    /// Report a failure that happened before the first invocation.
    async fn post_init_error(&self, error: &InvocationError) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RuntimeApiClient {
    client: Client,
    base_url: String,
}

impl RuntimeApiClient {
    /// `runtime_api` is the `host:port` the platform exposes the API on.
    pub fn new(runtime_api: &str) -> Self {
        Self::with_client(Client::new(), runtime_api)
    }

    pub fn with_client(client: Client, runtime_api: &str) -> Self {
        Self {
            client,
            base_url: format!("http://{}/{}", runtime_api.trim_end_matches('/'), API_VERSION),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(endpoint: String, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            endpoint,
            status,
            body,
        })
    }
}

#[async_trait]
impl ControlPlane for RuntimeApiClient {
    async fn next_invocation(&self) -> Result<NextInvocation> {
        let url = format!("{}/runtime/invocation/next", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = Self::check(url, response).await?;

        let context = invocation_context(response.headers())?;
        let payload = response.bytes().await?.to_vec();
        debug!(request_id = %context.request_id, bytes = payload.len(), "Received invocation");

        Ok(NextInvocation { context, payload })
    }

    #[instrument(skip(self, response))]
    async fn post_response(&self, request_id: &str, response: &Value) -> Result<()> {
        let url = format!("{}/runtime/invocation/{}/response", self.base_url, request_id);
        let reply = self.client.post(&url).json(response).send().await?;
        Self::check(url, reply).await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn post_error(&self, request_id: &str, error: &InvocationError) -> Result<()> {
        let url = format!("{}/runtime/invocation/{}/error", self.base_url, request_id);
        let reply = self
            .client
            .post(&url)
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(error)
            .send()
            .await?;
        Self::check(url, reply).await?;
        Ok(())
    }

    async fn post_init_error(&self, error: &InvocationError) -> Result<()> {
        let url = format!("{}/runtime/init/error", self.base_url);
        let reply = self
            .client
            .post(&url)
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(error)
            .send()
            .await?;
        Self::check(url, reply).await?;
        Ok(())
    }
}

fn invocation_context(headers: &HeaderMap) -> Result<InvocationContext> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let request_id = header(REQUEST_ID_HEADER)
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MissingRequestId)?;

    Ok(InvocationContext {
        request_id,
        deadline_ms: header(DEADLINE_HEADER).and_then(|deadline| deadline.parse().ok()),
        invoked_function_arn: header(FUNCTION_ARN_HEADER),
        trace_id: header(TRACE_ID_HEADER),
    })
}
