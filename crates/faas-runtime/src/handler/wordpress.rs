//! Standard WordPress install: every request goes through the root
//! `index.php`.

use super::{forward_to_worker, HandlerError, LambdaEventHandler, Result};
use async_trait::async_trait;
use faas_common::{InvocationEvent, LambdaResponse};
use faas_executor::FastCgiBackend;
use std::path::PathBuf;
use std::sync::Arc;

pub struct WordPressEventHandler {
    root: PathBuf,
    backend: Arc<dyn FastCgiBackend>,
}

impl WordPressEventHandler {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn FastCgiBackend>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    pub fn script_file_path(&self) -> PathBuf {
        self.root.join("index.php")
    }
}

#[async_trait]
impl LambdaEventHandler for WordPressEventHandler {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn can_handle(&self, event: &InvocationEvent) -> bool {
        event.http_request().is_some()
            && self.root.join("index.php").exists()
            && self.root.join("wp-config.php").exists()
    }

    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        let request = event
            .http_request()
            .ok_or(HandlerError::UnsupportedEvent("wordpress"))?;

        forward_to_worker(
            self.backend.as_ref(),
            request,
            &self.script_file_path(),
            &self.root,
        )
        .await
    }
}
