use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a convoy-related operation.
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// An error that occurred while managing images or target state.
#[derive(Debug, Error)]
pub enum ConvoyError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred during a database operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred during JSON (de)serialization.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred while parsing a TOML configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A fetch was suppressed because the image is still inside its backoff window.
    #[error("image download backoff: retry later")]
    ImageDownloadBackoff,

    /// The delta for the requested image is still being generated remotely.
    #[error("delta still processing remotely")]
    DeltaStillProcessing,

    /// The requested image, row or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A failure reported by the container engine or the transport, carrying a status code.
    #[error("(HTTP code {code}) {message}")]
    Status {
        /// The status code reported by the engine.
        code: u16,

        /// The message reported by the engine.
        message: String,
    },

    /// An invariant was violated; this points to a defect in the caller.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// An image name could not be parsed.
    #[error("image name error: {0}")]
    ImageNameError(String),

    /// A configuration value is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConvoyError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ConvoyError {
        ConvoyError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates a status error with the given code and message.
    pub fn status(code: u16, message: impl Into<String>) -> ConvoyError {
        ConvoyError::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the error means "absent" rather than "broken".
    ///
    /// Both [`ConvoyError::NotFound`] and a [`ConvoyError::Status`] with code 404 qualify.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConvoyError::NotFound(_) | ConvoyError::Status { code: 404, .. }
        )
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `ConvoyResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> ConvoyResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
