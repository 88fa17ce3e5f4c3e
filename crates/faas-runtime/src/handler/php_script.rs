//! A single PHP script named by the function's handler setting.

use super::{forward_to_worker, HandlerError, LambdaEventHandler, Result};
use async_trait::async_trait;
use faas_common::{InvocationEvent, LambdaResponse};
use faas_executor::FastCgiBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct PhpScriptEventHandler {
    root: PathBuf,
    script_file_path: PathBuf,
    backend: Arc<dyn FastCgiBackend>,
}

impl PhpScriptEventHandler {
    /// `script` is relative to `root`; a leading `/` is ignored.
    pub fn new(root: impl Into<PathBuf>, script: &str, backend: Arc<dyn FastCgiBackend>) -> Self {
        let root = root.into();
        let script_file_path = root.join(script.trim_start_matches('/'));

        Self {
            root,
            script_file_path,
            backend,
        }
    }

    pub fn script_file_path(&self) -> &Path {
        &self.script_file_path
    }

    fn is_php_file(&self) -> bool {
        self.script_file_path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("php"))
            && self.script_file_path.is_file()
    }
}

#[async_trait]
impl LambdaEventHandler for PhpScriptEventHandler {
    fn name(&self) -> &'static str {
        "php-script"
    }

    fn can_handle(&self, event: &InvocationEvent) -> bool {
        event.http_request().is_some() && self.is_php_file()
    }

    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        let request = event
            .http_request()
            .ok_or(HandlerError::UnsupportedEvent("php-script"))?;

        forward_to_worker(
            self.backend.as_ref(),
            request,
            &self.script_file_path,
            &self.root,
        )
        .await
    }
}
