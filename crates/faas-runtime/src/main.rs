use color_eyre::eyre;
use faas_common::InvocationError;
use faas_runtime::config::RUNTIME_API_VAR;
use faas_runtime::{ControlPlane, Runtime, RuntimeApiClient, RuntimeConfig};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Cold start");

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid runtime configuration");
            // Only reportable when the API address itself is known.
            if let Ok(runtime_api) = std::env::var(RUNTIME_API_VAR) {
                let report = InvocationError::new("Runtime.InvalidConfiguration", e.to_string());
                if let Err(post_error) = RuntimeApiClient::new(&runtime_api)
                    .post_init_error(&report)
                    .await
                {
                    warn!(error = %post_error, "Failed to report init error");
                }
            }
            return Err(e.into());
        }
    };

    info!(
        task_root = %config.task_root.display(),
        handler = %config.handler,
        "Loaded runtime configuration"
    );

    let mut runtime = Runtime::from_config(&config)?;
    runtime.start().await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let result = tokio::select! {
        result = runtime.run() => result,
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            Ok(())
        }
    };

    if let Err(e) = runtime.shutdown() {
        warn!(error = %e, "Failed to stop PHP-FPM");
    }

    result.map_err(Into::into)
}
