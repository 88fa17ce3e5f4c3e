//! PHP-FPM runtime for a serverless function platform.
//!
//! The runtime polls the platform's runtime API for invocations, hands each
//! event to the first matching [`handler`] and posts the result back. HTTP
//! events are executed by a PHP-FPM worker over FastCGI; the worker is kept
//! alive across invocations by the supervisor in `faas-executor`.

pub mod config;
pub mod handler;
pub mod runtime;
pub mod runtime_api;

pub use config::{ConfigError, RuntimeConfig};
pub use handler::{HandlerError, LambdaEventHandler, LambdaEventHandlerCollection};
pub use runtime::{Runtime, RuntimeError};
pub use runtime_api::{ApiError, ControlPlane, NextInvocation, RuntimeApiClient};
