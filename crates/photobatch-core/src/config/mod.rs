//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! TOML files and `PHOTOBATCH__`-prefixed environment variables. Each
//! sub-module represents a logical configuration section.

pub mod batch;
pub mod logging;

use serde::{Deserialize, Serialize};

use self::batch::BatchConfig;
use self::logging::LoggingConfig;

use crate::error::AppError;

pub use self::batch::BatchConfigOverrides;

/// Root application configuration.
///
/// Every section falls back to its defaults, so a missing file yields a
/// usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batch execution policy.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` with an environment-specific overlay
    /// and environment variables such as `PHOTOBATCH__BATCH__RETRY_ATTEMPTS`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PHOTOBATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app.batch.validate()?;
        Ok(app)
    }
}
