//! PHP-FPM execution backend.
//!
//! - [`fastcgi`]: the FastCGI bridge used to forward one HTTP request to the
//!   worker over its Unix socket
//! - [`php_fpm`]: the supervisor that owns the PHP-FPM worker process and its
//!   PID/socket markers

pub use faas_common as common;

pub mod fastcgi;
pub mod php_fpm;

pub use fastcgi::{FastCgiBackend, FastCgiClient, FastCgiError, FastCgiRequest, FastCgiResponse};
pub use php_fpm::{
    PhpFpmProcess, PreviousWorker, ProcessConfig, ProcessError, StartOutcome, WorkerState,
};
