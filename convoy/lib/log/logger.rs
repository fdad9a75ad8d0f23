use super::LogType;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Context attached to a system event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDetails {
    /// The image the event is about, if any.
    pub image: Option<String>,

    /// The rendered error, if the event reports a failure.
    pub error: Option<String>,
}

/// A sink for structured system events.
///
/// Implementations must not block; they are called inline from fetch and removal paths.
pub trait SystemLogger: Send + Sync {
    /// Logs one of the named system events.
    fn log_system_event(&self, log_type: LogType, details: EventDetails);

    /// Logs a free-text message, optionally tagged with an event name.
    fn log_system_message(&self, message: &str, details: EventDetails, event_name: Option<&str>);
}

/// A [`SystemLogger`] that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EventDetails {
    /// Details naming only an image.
    pub fn image(name: impl Into<String>) -> Self {
        Self {
            image: Some(name.into()),
            error: None,
        }
    }

    /// Attaches an error to the details.
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl SystemLogger for TracingLogger {
    fn log_system_event(&self, log_type: LogType, details: EventDetails) {
        let image = details.image.as_deref().unwrap_or_default();
        match details.error {
            Some(error) => tracing::error!(
                event = log_type.event_name(),
                image,
                %error,
                "{}",
                log_type.human_name()
            ),
            None if log_type.is_error() => tracing::error!(
                event = log_type.event_name(),
                image,
                "{}",
                log_type.human_name()
            ),
            None => tracing::info!(
                event = log_type.event_name(),
                image,
                "{}",
                log_type.human_name()
            ),
        }
    }

    fn log_system_message(&self, message: &str, details: EventDetails, event_name: Option<&str>) {
        let event = event_name.unwrap_or("System message");
        match details.error {
            Some(error) => tracing::warn!(event, %error, "{message}"),
            None => tracing::info!(event, "{message}"),
        }
    }
}
