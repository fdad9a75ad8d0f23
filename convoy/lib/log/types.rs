use std::fmt;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The catalogue of system events the image lifecycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    /// A full image pull started.
    DownloadImage,

    /// A delta image pull started.
    DownloadImageDelta,

    /// An image pull finished successfully.
    DownloadImageSuccess,

    /// An image pull failed.
    DownloadImageError,

    /// The requested delta is still being generated remotely.
    DeltaStillProcessingError,

    /// An image removal started.
    DeleteImage,

    /// An image was removed.
    DeleteImageSuccess,

    /// An image removal failed.
    DeleteImageError,

    /// A dangling or stale image could not be cleaned up.
    ImageCleanupError,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LogType {
    /// The machine-readable event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            LogType::DownloadImage => "Docker image download",
            LogType::DownloadImageDelta => "Delta image download",
            LogType::DownloadImageSuccess => "Image downloaded successfully",
            LogType::DownloadImageError => "Image download error",
            LogType::DeltaStillProcessingError => "Delta still processing remotely.",
            LogType::DeleteImage => "Image removal",
            LogType::DeleteImageSuccess => "Image removed",
            LogType::DeleteImageError => "Image removal error",
            LogType::ImageCleanupError => "Image cleanup error",
        }
    }

    /// The message shown to humans.
    pub fn human_name(&self) -> &'static str {
        match self {
            LogType::DownloadImage => "Downloading image",
            LogType::DownloadImageDelta => "Downloading delta for image",
            LogType::DownloadImageSuccess => "Downloaded image",
            LogType::DownloadImageError => "Failed to download image",
            LogType::DeltaStillProcessingError => {
                "Delta still processing remotely. Will retry..."
            }
            LogType::DeleteImage => "Deleting image",
            LogType::DeleteImageSuccess => "Deleted image",
            LogType::DeleteImageError => "Failed to delete image",
            LogType::ImageCleanupError => "Failed to clean up image",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LogType::DownloadImageError
                | LogType::DeleteImageError
                | LogType::ImageCleanupError
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}
