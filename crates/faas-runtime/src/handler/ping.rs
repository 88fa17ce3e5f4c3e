use super::{LambdaEventHandler, Result};
use async_trait::async_trait;
use faas_common::{EventKind, InvocationEvent, LambdaResponse};
use serde_json::Value;
use tracing::debug;

/// Answers warm-up pings without touching the worker.
pub struct PingEventHandler;

#[async_trait]
impl LambdaEventHandler for PingEventHandler {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn can_handle(&self, event: &InvocationEvent) -> bool {
        matches!(event.kind(), EventKind::Ping)
    }

    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        debug!(request_id = %event.id(), "Ping");
        Ok(LambdaResponse::Json(Value::Null))
    }
}
