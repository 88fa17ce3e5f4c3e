use super::{HandlerError, LambdaEventHandler, Result};
use async_trait::async_trait;
use faas_common::{EventKind, InvocationEvent, LambdaResponse};
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument};

/// Runs `php <command>` in the application root and returns its exit code
/// and combined output.
pub struct ConsoleCommandEventHandler {
    root: PathBuf,
    timeout: Duration,
    php_binary: String,
}

impl ConsoleCommandEventHandler {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            php_binary: "php".to_string(),
        }
    }

    /// Use another interpreter instead of `php` on the `PATH`.
    pub fn with_php_binary(mut self, php_binary: impl Into<String>) -> Self {
        self.php_binary = php_binary.into();
        self
    }
}

#[async_trait]
impl LambdaEventHandler for ConsoleCommandEventHandler {
    fn name(&self) -> &'static str {
        "console"
    }

    fn can_handle(&self, event: &InvocationEvent) -> bool {
        matches!(event.kind(), EventKind::ConsoleCommand(_))
    }

    #[instrument(skip(self, event), fields(request_id = %event.id()))]
    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        let EventKind::ConsoleCommand(console) = event.kind() else {
            return Err(HandlerError::UnsupportedEvent("console"));
        };

        let command_line = format!("{} {}", self.php_binary, console.command);
        info!(command = %command_line, "Running console command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(HandlerError::Console)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| HandlerError::ConsoleTimeout(self.timeout))?
            .map_err(HandlerError::Console)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(LambdaResponse::Json(json!({
            "exitCode": output.status.code().unwrap_or(-1),
            "output": combined,
        })))
    }
}
