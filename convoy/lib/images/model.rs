use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{engine::EngineImage, ConvoyError, ConvoyResult};

use super::name::{self, ImageName};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image the agent manages on behalf of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// The database row id, once stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub id: Option<i64>,

    /// `[registry/]repo@digest` or `[registry/]repo:tag`.
    #[builder(setter(into))]
    pub name: String,

    /// The application the image belongs to.
    pub app_id: i64,

    /// The uuid of the application the image belongs to.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub app_uuid: Option<String>,

    /// The service id assigned by the backend.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub service_id: Option<i64>,

    /// The service name within the release.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub service_name: Option<String>,

    /// The image id assigned by the backend.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub image_id: Option<i64>,

    /// The release the image was built for.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub release_id: Option<i64>,

    /// The release commit the image was built for.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub commit: Option<String>,

    /// Zero for application images, nonzero for dependent images.
    #[serde(default)]
    #[builder(default)]
    pub dependent: i64,

    /// The engine content id, unknown until the image has been resolved.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub docker_image_id: Option<String>,

    /// The transient lifecycle status. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub status: Option<ImageStatus>,

    /// Download progress, 0 to 100. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub download_progress: Option<u8>,
}

/// The transient lifecycle status of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageStatus {
    /// The image is being pulled.
    Downloading,

    /// The image is present on the engine.
    Downloaded,

    /// The image is being removed.
    Deleting,
}

/// A partial update of an image's externally visible state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageState {
    /// The new status, if it changed.
    pub status: Option<ImageStatus>,

    /// The new progress, if it changed.
    pub download_progress: Option<u8>,
}

/// The service fields an image is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceImageInfo {
    /// The image name the service runs.
    pub image_name: String,

    /// The application id.
    pub app_id: i64,

    /// The service id.
    pub service_id: i64,

    /// The service name.
    pub service_name: String,

    /// The backend image id.
    pub image_id: i64,

    /// The release id.
    pub release_id: i64,
}

/// How an image should be fetched.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct FetchOptions {
    /// Whether delta pulls are enabled.
    #[builder(default)]
    pub delta: bool,

    /// The image a delta should be applied on top of.
    #[builder(default, setter(strip_option, into))]
    pub delta_source: Option<String>,

    /// The delta protocol version.
    #[builder(default = 3)]
    pub delta_version: u8,

    /// The delta server endpoint.
    #[builder(default, setter(strip_option, into))]
    pub delta_endpoint: Option<String>,

    /// Timeout for the delta request.
    #[builder(default = Duration::from_secs(30))]
    pub delta_request_timeout: Duration,

    /// Timeout for applying a downloaded delta.
    #[builder(default = Duration::from_secs(0))]
    pub delta_apply_timeout: Duration,

    /// How many times a failed delta request is retried.
    #[builder(default = 30)]
    pub delta_retry_count: u32,

    /// Delay between delta retries.
    #[builder(default = Duration::from_secs(10))]
    pub delta_retry_interval: Duration,

    /// The device uuid used to authenticate with the registry.
    #[builder(default, setter(strip_option, into))]
    pub uuid: Option<String>,

    /// The API key used to authenticate with the registry.
    #[builder(default, setter(strip_option, into))]
    pub api_key: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Image {
    /// Returns a copy of the image with its name normalised.
    pub fn normalised(&self) -> ConvoyResult<Image> {
        if self.name.trim().is_empty() {
            return Err(ConvoyError::InternalInconsistency(format!(
                "image name is invalid, got: {:?}",
                self.name
            )));
        }

        let mut image = self.clone();
        image.name = name::normalise(&self.name)?;
        Ok(image)
    }

    /// Returns a copy carrying the given transient state.
    pub fn with_state(&self, state: ImageState) -> Image {
        let mut image = self.clone();
        if state.status.is_some() {
            image.status = state.status;
        }
        if state.download_progress.is_some() {
            image.download_progress = state.download_progress;
        }
        image
    }

    /// Whether the engine image carries this image's `repo:tag` or its digest.
    pub fn matches_tag_or_digest(&self, engine_image: &EngineImage) -> bool {
        let tagged = self
            .name
            .parse::<ImageName>()
            .map(|name| engine_image.repo_tags.contains(&name.with_tag()))
            .unwrap_or(false);

        tagged
            || engine_image
                .repo_digests
                .iter()
                .any(|digest| name::has_same_digest(Some(&self.name), Some(digest)))
    }

    /// Whether any of the engine images is this image, by tag, digest or engine id.
    pub fn is_available_in(&self, engine_images: &[EngineImage]) -> bool {
        engine_images.iter().any(|engine_image| {
            self.matches_tag_or_digest(engine_image)
                || self.docker_image_id.as_deref() == Some(engine_image.id.as_str())
        })
    }
}

impl FetchOptions {
    /// Whether a delta pull should be attempted.
    pub fn wants_delta(&self) -> bool {
        self.delta && self.delta_source.is_some()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the image record for a target service.
pub fn image_from_service(service: ServiceImageInfo) -> Image {
    Image {
        name: service.image_name,
        app_id: service.app_id,
        service_id: Some(service.service_id),
        service_name: Some(service.service_name),
        image_id: Some(service.image_id),
        release_id: Some(service.release_id),
        dependent: 0,
        ..Default::default()
    }
}

/// Returns true if two images share a name or a digest.
pub fn is_same_image(image1: &Image, image2: &Image) -> bool {
    image1.name == image2.name
        || name::has_same_digest(Some(&image1.name), Some(&image2.name))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for FetchOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageStatus::Downloading => "Downloading",
            ImageStatus::Downloaded => "Downloaded",
            ImageStatus::Deleting => "Deleting",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ImageStatus {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Downloading" => Ok(ImageStatus::Downloading),
            "Downloaded" => Ok(ImageStatus::Downloaded),
            "Deleting" => Ok(ImageStatus::Deleting),
            other => Err(ConvoyError::InternalInconsistency(format!(
                "unknown image status: {other}"
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_normalised_rejects_empty_name() {
        let image = Image::builder().name("").app_id(1).build();
        assert!(matches!(
            image.normalised(),
            Err(ConvoyError::InternalInconsistency(_))
        ));
    }

    #[test]
    fn test_image_normalised_adds_default_tag() -> anyhow::Result<()> {
        let image = Image::builder().name("alpine").app_id(1).build();
        assert_eq!(image.normalised()?.name, "alpine:latest");
        Ok(())
    }

    #[test]
    fn test_image_from_service() {
        let image = image_from_service(ServiceImageInfo {
            image_name: "ubuntu:latest".into(),
            app_id: 1,
            service_id: 2,
            service_name: "main".into(),
            image_id: 3,
            release_id: 4,
        });

        assert_eq!(image.name, "ubuntu:latest");
        assert_eq!(image.service_id, Some(2));
        assert_eq!(image.service_name.as_deref(), Some("main"));
        assert_eq!(image.image_id, Some(3));
        assert_eq!(image.release_id, Some(4));
        assert_eq!(image.dependent, 0);
        assert!(image.docker_image_id.is_none());
    }

    #[test]
    fn test_is_same_image() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let a = Image::builder().name(format!("one@{digest}")).app_id(1).build();
        let b = Image::builder().name(format!("two@{digest}")).app_id(1).build();
        let c = Image::builder().name("two:latest").app_id(1).build();
        assert!(is_same_image(&a, &b));
        assert!(is_same_image(&c, &c.clone()));
        assert!(!is_same_image(&a, &c));
    }

    #[test]
    fn test_image_matches_tag_or_digest() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let by_tag = EngineImage {
            id: "sha256:1".into(),
            repo_tags: vec!["ubuntu:latest".into()],
            repo_digests: vec![],
        };
        let by_digest = EngineImage {
            id: "sha256:2".into(),
            repo_tags: vec![],
            repo_digests: vec![format!("registry/app@{digest}")],
        };

        let ubuntu = Image::builder().name("ubuntu").app_id(1).build();
        assert!(ubuntu.matches_tag_or_digest(&by_tag));
        assert!(!ubuntu.matches_tag_or_digest(&by_digest));

        let app = Image::builder()
            .name(format!("other/app@{digest}"))
            .app_id(1)
            .build();
        assert!(app.matches_tag_or_digest(&by_digest));
        assert!(!app.matches_tag_or_digest(&by_tag));
    }

    #[test]
    fn test_image_is_available_by_engine_id() {
        let engine_images = vec![EngineImage {
            id: "sha256:3".into(),
            ..Default::default()
        }];

        let known = Image::builder()
            .name("alpine:latest")
            .app_id(1)
            .docker_image_id("sha256:3")
            .build();
        let unknown = Image::builder().name("alpine:latest").app_id(1).build();
        assert!(known.is_available_in(&engine_images));
        assert!(!unknown.is_available_in(&engine_images));
    }

    #[test]
    fn test_fetch_options_wants_delta() {
        assert!(!FetchOptions::default().wants_delta());
        assert!(!FetchOptions::builder().delta(true).build().wants_delta());
        assert!(FetchOptions::builder()
            .delta(true)
            .delta_source("app:old")
            .build()
            .wants_delta());
    }
}
