//! Invocation event handlers.
//!
//! Handlers are tried in a fixed order and the first one that can handle an
//! event owns it. The runtime-level handlers (ping, console command) come
//! first, followed by the application layouts from most to least specific:
//! Bedrock, WordPress, then a single PHP script.

pub mod bedrock;
pub mod console;
pub mod php_script;
pub mod ping;
pub mod wordpress;

pub use bedrock::BedrockEventHandler;
pub use console::ConsoleCommandEventHandler;
pub use php_script::PhpScriptEventHandler;
pub use ping::PingEventHandler;
pub use wordpress::WordPressEventHandler;

use async_trait::async_trait;
use faas_common::{HttpRequestEvent, HttpResponse, InvocationEvent, LambdaResponse};
use faas_executor::{FastCgiBackend, FastCgiError, FastCgiRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::RuntimeConfig;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("No handler found to process invocation event {0}")]
    NoHandler(String),

    #[error("{0} handler cannot process this event")]
    UnsupportedEvent(&'static str),

    #[error(transparent)]
    FastCgi(#[from] FastCgiError),

    #[error("Console command timed out after {0:?}")]
    ConsoleTimeout(Duration),

    #[error("Failed to run console command: {0}")]
    Console(#[source] std::io::Error),

    #[error("Invalid rewrite rule: {0}")]
    Pattern(#[from] regex::Error),
}

impl HandlerError {
    /// `errorType` reported to the control plane.
    pub fn error_type(&self) -> &'static str {
        match self {
            HandlerError::NoHandler(_) => "Runtime.NoHandler",
            HandlerError::UnsupportedEvent(_) => "Runtime.UnsupportedEvent",
            HandlerError::FastCgi(_) => "Runtime.FastCgiError",
            HandlerError::ConsoleTimeout(_) => "Runtime.ConsoleTimeout",
            HandlerError::Console(_) => "Runtime.ConsoleError",
            HandlerError::Pattern(_) => "Runtime.HandlerError",
        }
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;

#[async_trait]
pub trait LambdaEventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn can_handle(&self, event: &InvocationEvent) -> bool;

    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse>;
}

/// Ordered handler chain. Only the first matching handler is invoked.
#[derive(Default)]
pub struct LambdaEventHandlerCollection {
    handlers: Vec<Box<dyn LambdaEventHandler>>,
}

impl LambdaEventHandlerCollection {
    pub fn new(handlers: Vec<Box<dyn LambdaEventHandler>>) -> Self {
        Self { handlers }
    }

    /// The standard chain for an application rooted at `config.task_root`.
    pub fn for_application(
        config: &RuntimeConfig,
        backend: Arc<dyn FastCgiBackend>,
    ) -> Result<Self> {
        let root = config.task_root.clone();

        Ok(Self::new(vec![
            Box::new(PingEventHandler),
            Box::new(ConsoleCommandEventHandler::new(&root, config.console_timeout)),
            Box::new(BedrockEventHandler::new(&root, backend.clone())?),
            Box::new(WordPressEventHandler::new(&root, backend.clone())),
            Box::new(PhpScriptEventHandler::new(&root, &config.handler, backend)),
        ]))
    }

    /// Handler names in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    pub fn can_handle(&self, event: &InvocationEvent) -> bool {
        self.handlers.iter().any(|handler| handler.can_handle(event))
    }

    pub async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        let handler = self
            .handlers
            .iter()
            .find(|handler| handler.can_handle(event))
            .ok_or_else(|| HandlerError::NoHandler(event.id().to_string()))?;

        debug!(request_id = %event.id(), handler = handler.name(), "Dispatching event");
        handler.handle(event).await
    }
}

/// Execute `script_filename` for the HTTP request on the PHP-FPM worker.
async fn forward_to_worker(
    backend: &dyn FastCgiBackend,
    request: &HttpRequestEvent,
    script_filename: &Path,
    document_root: &Path,
) -> Result<LambdaResponse> {
    debug!(
        script = %script_filename.display(),
        path = %request.path,
        "Forwarding request to PHP-FPM"
    );

    let fastcgi_request = FastCgiRequest::from_http_event(request, script_filename, document_root);
    let response = backend.handle(fastcgi_request).await?;

    Ok(LambdaResponse::Http(HttpResponse::from(response)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use faas_common::{EventKind, HttpRequestEvent, InvocationContext, InvocationEvent};
    use faas_executor::{FastCgiBackend, FastCgiRequest, FastCgiResponse};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    /// Backend that records every request and answers with a fixed page.
    #[derive(Default)]
    pub struct RecordingBackend {
        requests: Mutex<Vec<FastCgiRequest>>,
    }

    impl RecordingBackend {
        pub fn requests(&self) -> Vec<FastCgiRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn script_filenames(&self) -> Vec<String> {
            self.requests()
                .iter()
                .map(|request| request.script_filename().to_string_lossy().into_owned())
                .collect()
        }
    }

    #[async_trait]
    impl FastCgiBackend for RecordingBackend {
        async fn handle(
            &self,
            request: FastCgiRequest,
        ) -> faas_executor::fastcgi::Result<FastCgiResponse> {
            self.requests.lock().unwrap().push(request);
            FastCgiResponse::parse(b"Content-type: text/html\r\n\r\n<p>ok</p>")
        }
    }

    pub fn http_event(path: &str) -> InvocationEvent {
        InvocationEvent::new(
            InvocationContext::new("request-1"),
            EventKind::HttpRequest(HttpRequestEvent::new("GET", path)),
        )
    }

    pub fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "<?php\n").unwrap();
    }
}
