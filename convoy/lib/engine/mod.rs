//! Interfaces to the container engine and the delta transfer backend.
//!
//! Neither is implemented in this crate. The image lifecycle drives them through the
//! [`ContainerEngine`] and [`DeltaBackend`] traits.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{images::FetchOptions, ConvoyResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The placeholder the engine reports for an image without tags.
pub const NONE_REPO_TAG: &str = "<none>:<none>";

/// The placeholder the engine reports for an image without digests.
pub const NONE_REPO_DIGEST: &str = "<none>@<none>";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image as listed or inspected by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineImage {
    /// The engine-assigned content id.
    pub id: String,

    /// `repo:tag` references pointing at this image.
    #[serde(default)]
    pub repo_tags: Vec<String>,

    /// `repo@digest` references pointing at this image.
    #[serde(default)]
    pub repo_digests: Vec<String>,
}

/// Progress reported while pulling an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullEvent {
    /// The transfer advanced to the given percentage (0-100).
    Progress(u8),

    /// The transfer finished and the engine stored the image under this id.
    Complete(String),
}

/// A differential pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRequest {
    /// The normalised name of the image to produce.
    pub image_name: String,

    /// The engine id of the image the delta applies on top of.
    pub source_id: String,

    /// The service the image is for. Used only for reporting.
    pub service_name: String,
}

/// A stream of pull progress that ends with [`PullEvent::Complete`].
pub type PullStream = BoxStream<'static, ConvoyResult<PullEvent>>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The subset of a container engine API the image lifecycle needs.
///
/// A missing image must be reported as an error for which
/// [`ConvoyError::is_not_found`](crate::ConvoyError::is_not_found) is true.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Lists images with their digests. When `reference` is given, only images matching it are
    /// returned: `repo:tag` matches that tag, a bare `repo` matches any tag or digest of the
    /// repository.
    async fn list_images(&self, reference: Option<&str>) -> ConvoyResult<Vec<EngineImage>>;

    /// Inspects an image by id, `repo:tag` or `repo@digest`.
    async fn inspect_image(&self, name: &str) -> ConvoyResult<EngineImage>;

    /// Adds the `repo:tag` reference to the image with the given id or name.
    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> ConvoyResult<()>;

    /// Removes an image reference, or the image itself when `force` is set.
    async fn remove_image(&self, name: &str, force: bool) -> ConvoyResult<()>;

    /// Pulls an image, streaming its progress.
    async fn pull_image(&self, name: &str, options: &FetchOptions) -> ConvoyResult<PullStream>;
}

/// A backend able to apply a binary delta on top of a local image.
///
/// When the delta has not been generated yet the stream fails with
/// [`ConvoyError::DeltaStillProcessing`](crate::ConvoyError::DeltaStillProcessing).
#[async_trait]
pub trait DeltaBackend: Send + Sync {
    /// Starts the delta pull and streams its progress.
    async fn fetch_delta(
        &self,
        request: DeltaRequest,
        options: &FetchOptions,
    ) -> ConvoyResult<PullStream>;
}
