//! Agent configuration.

use std::{env, path::Path, path::PathBuf, time::Duration};

use getset::Getters;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::fs;
use typed_builder::TypedBuilder;

use super::{
    AGENT_IMAGE_ENV_VAR, APP_UPDATE_POLL_INTERVAL_ENV_VAR, DATABASE_PATH_ENV_VAR,
    DEFAULT_AGENT_IMAGE, DEFAULT_APP_UPDATE_POLL_INTERVAL, DEFAULT_BACKOFF_INCREMENT,
    DEFAULT_DATABASE_PATH, DEFAULT_IMAGE_CLEANUP_ERROR_IGNORE_TIMEOUT,
    DEFAULT_REMOVAL_JITTER_MAX,
};
use crate::{ConvoyError, ConvoyResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The agent configuration.
///
/// Durations are read from and written to TOML as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct Config {
    /// How often the target state is polled. Bounds the fetch backoff delay.
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    #[builder(default = DEFAULT_APP_UPDATE_POLL_INTERVAL)]
    app_update_poll_interval: Duration,

    /// The base unit of the exponential fetch backoff.
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    #[builder(default = DEFAULT_BACKOFF_INCREMENT)]
    backoff_increment: Duration,

    /// How long an image that failed cleanup is skipped.
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    #[builder(default = DEFAULT_IMAGE_CLEANUP_ERROR_IGNORE_TIMEOUT)]
    image_cleanup_error_ignore_timeout: Duration,

    /// Upper bound of the random delay inserted before engine removals.
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    #[builder(default = DEFAULT_REMOVAL_JITTER_MAX)]
    removal_jitter_max: Duration,

    /// The image the agent itself is running from.
    #[builder(default = DEFAULT_AGENT_IMAGE.to_string(), setter(into))]
    agent_image: String,

    /// Path to the SQLite database.
    #[builder(default = PathBuf::from(DEFAULT_DATABASE_PATH), setter(into))]
    database_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Parses a configuration from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> ConvoyResult<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file and applies environment overrides on top of it.
    pub async fn load(path: impl AsRef<Path>) -> ConvoyResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Overrides fields from `CONVOY_*` environment variables when they are set.
    pub fn apply_env_overrides(&mut self) -> ConvoyResult<()> {
        if let Ok(value) = env::var(APP_UPDATE_POLL_INTERVAL_ENV_VAR) {
            let millis = value.trim().parse::<u64>().map_err(|e| {
                ConvoyError::InvalidConfig(format!(
                    "{APP_UPDATE_POLL_INTERVAL_ENV_VAR}={value}: {e}"
                ))
            })?;
            self.app_update_poll_interval = Duration::from_millis(millis);
        }

        if let Ok(value) = env::var(AGENT_IMAGE_ENV_VAR) {
            self.agent_image = value;
        }

        if let Ok(value) = env::var(DATABASE_PATH_ENV_VAR) {
            self.database_path = PathBuf::from(value);
        }

        self.validate()
    }

    fn validate(&self) -> ConvoyResult<()> {
        if self.app_update_poll_interval.is_zero() {
            return Err(ConvoyError::InvalidConfig(
                "app_update_poll_interval must be greater than zero".into(),
            ));
        }

        if self.agent_image.trim().is_empty() {
            return Err(ConvoyError::InvalidConfig(
                "agent_image must not be empty".into(),
            ));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Serialization Helpers
//--------------------------------------------------------------------------------------------------

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
