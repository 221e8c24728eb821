//! Controller configuration loading

use anyhow::{Context, Result};
use controller_lib::ControllerConfig;
use std::path::Path;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "HEALTH_CONFIG";

/// Prefix for per-field overrides, e.g. `HEALTH__SESSIONS__MAX_SESSIONS=200`
const ENV_PREFIX: &str = "HEALTH";

/// Load configuration from the optional file and the environment, then validate
///
/// Any failure here is fatal: the controller never starts on bad thresholds.
pub fn load() -> Result<ControllerConfig> {
    let file = std::env::var(CONFIG_FILE_ENV).ok();
    load_from(file.as_deref().map(Path::new))
}

pub fn load_from(file: Option<&Path>) -> Result<ControllerConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config: ControllerConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read controller configuration")?
        .try_deserialize()
        .context("failed to parse controller configuration")?;

    config.validate()?;
    Ok(config)
}
