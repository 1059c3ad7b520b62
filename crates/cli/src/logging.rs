//! Diagnostic logging setup
//!
//! Diagnostics go to stderr through a non-blocking writer; stdout carries the
//! probe relay and the final summary only.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "gpuval=info,gpuval_core=info,gpuval_infra_system=info";

/// Install the global subscriber; keep the returned guard alive until exit
pub fn init(format: &str) -> Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    match format {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
                .context("Failed to install json subscriber")?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(writer))
                .try_init()
                .context("Failed to install subscriber")?;
        }
    }

    Ok(guard)
}
