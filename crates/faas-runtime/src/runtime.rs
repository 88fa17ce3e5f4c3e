//! The invocation loop.
//!
//! One invocation is processed end to end before the next one is requested.
//! Only a failure to reach the control plane or to keep the PHP-FPM worker
//! alive ends the loop; everything that goes wrong while handling a single
//! event is reported back as an invocation error.

use crate::config::{ConfigError, RuntimeConfig};
use crate::handler::{HandlerError, LambdaEventHandlerCollection};
use crate::runtime_api::{ApiError, ControlPlane, NextInvocation, RuntimeApiClient};
use faas_common::{InvocationContext, InvocationError, InvocationEvent};
use faas_executor::{PhpFpmProcess, ProcessError, StartOutcome};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Runtime API error: {0}")]
    Api(#[from] ApiError),

    #[error("PHP-FPM error: {0}")]
    Process(#[from] ProcessError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to set up event handlers: {0}")]
    Handler(#[from] HandlerError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

pub struct Runtime<C> {
    api: C,
    process: PhpFpmProcess,
    handlers: LambdaEventHandlerCollection,
}

impl Runtime<RuntimeApiClient> {
    /// Runtime talking to the platform's API, with the standard handler
    /// chain wired to the supervised worker.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let api = RuntimeApiClient::new(&config.runtime_api);
        let process = PhpFpmProcess::new(config.process.clone());
        let backend = Arc::new(process.client(config.fastcgi_timeout));
        let handlers = LambdaEventHandlerCollection::for_application(config, backend)?;

        Ok(Self::new(api, process, handlers))
    }
}

impl<C: ControlPlane> Runtime<C> {
    pub fn new(api: C, process: PhpFpmProcess, handlers: LambdaEventHandlerCollection) -> Self {
        Self {
            api,
            process,
            handlers,
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    pub fn process(&self) -> &PhpFpmProcess {
        &self.process
    }

    /// Cold start: bring up the worker. A failure is reported to the control
    /// plane as an init error and is fatal.
    pub async fn start(&mut self) -> Result<()> {
        let started = Instant::now();

        match self.process.ensure_running().await {
            Ok(outcome) => {
                info!(
                    ?outcome,
                    handlers = ?self.handlers.names(),
                    elapsed = ?started.elapsed(),
                    "Runtime started"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "PHP-FPM failed to start");
                let report = InvocationError::new("Runtime.PhpFpmStartFailed", e.to_string());
                if let Err(post_error) = self.api.post_init_error(&report).await {
                    warn!(error = %post_error, "Failed to report init error");
                }
                Err(e.into())
            }
        }
    }

    /// Wait for the next invocation and process it.
    pub async fn process_next_event(&mut self) -> Result<()> {
        let NextInvocation { context, payload } = self.api.next_invocation().await?;
        let request_id = context.request_id.clone();

        let span = info_span!("invocation", request_id = %request_id);
        self.process_invocation(request_id, context, payload)
            .instrument(span)
            .await
    }

    /// Process invocations until a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.process_next_event().await?;
        }
    }

    /// Ask the worker to stop. Does not wait for it to exit.
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down runtime");
        self.process.stop()?;
        Ok(())
    }

    async fn process_invocation(
        &mut self,
        request_id: String,
        context: InvocationContext,
        payload: Vec<u8>,
    ) -> Result<()> {
        let started = Instant::now();

        match self.process.ensure_running().await {
            Ok(StartOutcome::AlreadyRunning) => {}
            Ok(outcome) => warn!(?outcome, "PHP-FPM worker was restarted"),
            Err(e) => {
                error!(error = %e, "PHP-FPM is not running");
                let report = InvocationError::new("Runtime.PhpFpmError", e.to_string());
                self.api.post_error(&request_id, &report).await?;
                return Err(e.into());
            }
        }

        let event = match InvocationEvent::from_payload(context, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Invalid invocation event");
                let report = InvocationError::new("Runtime.InvalidEvent", e.to_string());
                self.api.post_error(&request_id, &report).await?;
                return Ok(());
            }
        };

        let response = match self.handlers.handle(&event).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Invocation failed");
                let report = InvocationError::new(e.error_type(), e.to_string());
                self.api.post_error(&request_id, &report).await?;
                return Ok(());
            }
        };

        let payload = response.to_payload(event.payload_version());
        if let Err(e) = self.api.post_response(&request_id, &payload).await {
            // The control plane can refuse a response (too large, malformed)
            // while still accepting an error for the same invocation.
            warn!(error = %e, "Response was rejected");
            let report = InvocationError::new("Runtime.ResponseRejected", e.to_string());
            self.api.post_error(&request_id, &report).await?;
            return Ok(());
        }

        info!(
            status = ?response.status_code(),
            elapsed = ?started.elapsed(),
            "Invocation completed"
        );
        Ok(())
    }
}
