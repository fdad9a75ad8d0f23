use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often the target state is polled. Also the ceiling of any fetch backoff delay.
pub const DEFAULT_APP_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The base unit of the exponential fetch backoff.
pub const DEFAULT_BACKOFF_INCREMENT: Duration = Duration::from_millis(500);

/// How long an image that failed cleanup is skipped before being retried.
pub const DEFAULT_IMAGE_CLEANUP_ERROR_IGNORE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Upper bound of the random delay inserted before engine removals.
pub const DEFAULT_REMOVAL_JITTER_MAX: Duration = Duration::from_millis(100);

/// The image the agent itself runs from.
pub const DEFAULT_AGENT_IMAGE: &str = "balena/amd64-supervisor:latest";

/// The default SQLite database file.
pub const DEFAULT_DATABASE_PATH: &str = "/data/database.sqlite";

/// The tag assumed when an image name carries none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Environment variable overriding the poll interval, in milliseconds.
pub const APP_UPDATE_POLL_INTERVAL_ENV_VAR: &str = "CONVOY_APP_UPDATE_POLL_INTERVAL_MS";

/// Environment variable overriding the agent image.
pub const AGENT_IMAGE_ENV_VAR: &str = "CONVOY_AGENT_IMAGE";

/// Environment variable overriding the database path.
pub const DATABASE_PATH_ENV_VAR: &str = "CONVOY_DATABASE_PATH";
