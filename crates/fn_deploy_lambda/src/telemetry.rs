//! Logging initialisation for the `fn_deploy` binary.

use clap::ValueEnum;
use fn_deploy_core::error::{DeployError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event, for CI and log shipping.
    Json,
    #[default]
    Pretty,
}

/// Installs the global tracing subscriber, writing to stderr.
///
/// Fails if a subscriber has already been installed.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|error| {
        DeployError::configuration(format!("failed to install tracing subscriber: {error}"))
    })
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
