// src/observability/mod.rs
//! Internal diagnostics and counters
//!
//! - `init_tracing`: stderr subscriber for the binary (`RUST_LOG`, JSON when
//!   `LOGSINK_LOG_FORMAT=json`)
//! - `init_metrics`: Prometheus scrape endpoint for the `metrics` facade
//! - `PipelineStats`: the counters every stage reports into
//!
//! The library never installs a global subscriber or recorder; only the
//! binary calls the `init_*` functions. Diagnostics are never shipped through
//! the pipeline they describe.

pub mod stats;

pub use stats::{DropCause, PipelineStats, StatsSnapshot};

use crate::utils::errors::{PipelineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting the diagnostic log format
pub const LOG_FORMAT_ENV: &str = "LOGSINK_LOG_FORMAT";

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };

    result.map_err(|e| PipelineError::Telemetry(format!("tracing: {}", e)))
}

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::Telemetry(format!("metrics: {}", e)))?;

    info!("Prometheus metrics listening on http://{}/metrics", addr);
    Ok(())
}
