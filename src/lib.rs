//! Declarative configuration and one-time bootstrap for logging and tracing.
//!
//! `lookout` ties the two workspace crates together: [`config`] resolves a
//! schema of field-sets into a validated configuration, and [`observability`]
//! turns that configuration into an installed logger and trace provider.
//!
//! ```no_run
//! use std::time::Duration;
//! use lookout::{bootstrap, Overrides, Telemetry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let telemetry = Telemetry::new();
//! bootstrap(&telemetry, &Overrides::new().with("log", "level", "debug"))?;
//!
//! let observer = telemetry.observer("checkout")?;
//! observer.logger().info("ready");
//!
//! telemetry.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Context;
use tracing::info;

pub use lookout_config as config;
pub use lookout_observability as observability;

pub use lookout_config::{Overrides, ResolutionError, ResolvedConfig, Value};
pub use lookout_observability::{
    LifecycleState, LogLevel, Observer, ObservabilityConfig, Telemetry, TelemetryError,
    TelemetryResult,
};

/// Resolves the standard registry against `overrides` and initializes
/// `telemetry` with the result.
///
/// Every violation is reported at once; nothing is installed unless the
/// whole configuration resolves.
pub fn bootstrap(telemetry: &Telemetry, overrides: &Overrides) -> TelemetryResult<ResolvedConfig> {
    let resolved = observability::registry()?.resolve(overrides)?;
    telemetry.initialize(&resolved)?;
    Ok(resolved)
}

/// Same as [`bootstrap`], with overrides read from `{prefix}{SET}_{FIELD}`
/// environment variables.
pub fn bootstrap_from_env(telemetry: &Telemetry, prefix: &str) -> anyhow::Result<ResolvedConfig> {
    let registry = observability::registry().context("building the configuration registry")?;
    let overrides = registry
        .overrides_from_env(prefix)
        .context("reading overrides from the environment")?;
    let resolved = registry.resolve(&overrides).context("resolving configuration")?;
    telemetry.initialize(&resolved).context("initializing telemetry")?;
    info!(
        env.prefix = prefix,
        overrides = overrides.len(),
        "telemetry bootstrapped from environment"
    );
    Ok(resolved)
}
