use std::{fmt, str::FromStr, sync::LazyLock};

use getset::Getters;
use oci_spec::image::Digest;
use regex::Regex;

use crate::{
    config::DEFAULT_IMAGE_TAG,
    engine::{EngineImage, NONE_REPO_DIGEST, NONE_REPO_TAG},
    ConvoyError, ConvoyResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static REGISTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap());

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed image name: `[registry/]repository[:tag][@digest]`.
///
/// Unlike a fully qualified OCI reference, no default registry or namespace is filled in, so
/// `ubuntu:latest` stays `ubuntu:latest` after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageName {
    /// The registry host, if the name carries one.
    registry: Option<String>,

    /// The repository path.
    repository: String,

    /// The tag, if the name carries one.
    tag: Option<String>,

    /// The content digest, if the name carries one.
    digest: Option<Digest>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageName {
    /// `registry/repository`, or just the repository when there is no registry.
    pub fn repo(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// The tag, falling back to `latest`.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_IMAGE_TAG)
    }

    /// The canonical form used as an image identity.
    ///
    /// A name with a digest becomes `repo@digest` and drops its tag; otherwise `repo:tag`.
    pub fn normalise(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}@{}", self.repo(), digest),
            None => self.with_tag(),
        }
    }

    /// `repo:tag`, ignoring any digest. This is the reference images are tagged with locally.
    pub fn with_tag(&self) -> String {
        format!("{}:{}", self.repo(), self.tag_or_default())
    }

    /// The engine filter matching this name: `repo:tag` when the name carries a tag, otherwise
    /// the bare `repo`, which matches every tag and digest of the repository.
    pub fn reference(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}:{}", self.repo(), tag),
            None => self.repo(),
        }
    }

    /// The `(repo, tag)` pair to tag an engine image with.
    pub fn repo_and_tag(&self) -> (String, String) {
        (self.repo(), self.tag_or_default().to_string())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for ImageName {
    type Err = ConvoyError;

    /// Parses `[registry/]repository[:tag][@digest]`.
    ///
    /// The first path segment is a registry only if it contains a `.` or a `:`, or is
    /// `localhost`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConvoyError::ImageNameError("input string is empty".into()));
        }

        let (path, digest) = match s.split_once('@') {
            Some((path, digest_str)) => {
                let digest = digest_str.parse::<Digest>().map_err(|e| {
                    ConvoyError::ImageNameError(format!("invalid digest {digest_str}: {e}"))
                })?;
                (path, Some(digest))
            }
            None => (s, None),
        };

        let (registry, remainder) = extract_registry_and_path(path);
        let (repository, tag) = extract_repository_and_tag(remainder)?;

        if let Some(registry) = &registry {
            validate_registry(registry)?;
        }
        validate_repository(&repository)?;
        if let Some(tag) = &tag {
            validate_tag(tag)?;
        }

        Ok(ImageName {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalise())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalises an image name. See [`ImageName::normalise`].
pub fn normalise(name: &str) -> ConvoyResult<String> {
    Ok(name.parse::<ImageName>()?.normalise())
}

/// Returns true if both names carry the same digest.
pub fn has_same_digest(name1: Option<&str>, name2: Option<&str>) -> bool {
    let digest1 = name1.and_then(|n| n.split_once('@')).map(|(_, d)| d);
    let digest2 = name2.and_then(|n| n.split_once('@')).map(|(_, d)| d);
    digest1.is_some() && digest1 == digest2
}

/// Returns true if an engine image has neither tags nor digests.
pub fn is_dangling(image: &EngineImage) -> bool {
    let untagged = image.repo_tags.is_empty() || image.repo_tags == [NONE_REPO_TAG];
    let undigested = image.repo_digests.is_empty() || image.repo_digests == [NONE_REPO_DIGEST];
    untagged && undigested
}

/// Normalises every tag of an engine image, skipping placeholders that do not parse.
pub fn normalised_tags(image: &EngineImage) -> Vec<String> {
    image
        .repo_tags
        .iter()
        .filter_map(|tag| normalise(tag).ok())
        .collect()
}

fn validate_registry(registry: &str) -> ConvoyResult<()> {
    if REGISTRY_RE.is_match(registry) {
        Ok(())
    } else {
        Err(ConvoyError::ImageNameError(format!(
            "invalid registry: {}",
            registry
        )))
    }
}

fn validate_repository(repository: &str) -> ConvoyResult<()> {
    if REPOSITORY_RE.is_match(repository) {
        Ok(())
    } else {
        Err(ConvoyError::ImageNameError(format!(
            "invalid repository: {}",
            repository
        )))
    }
}

fn validate_tag(tag: &str) -> ConvoyResult<()> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(ConvoyError::ImageNameError(format!("invalid tag: {}", tag)))
    }
}

/// Splits off the registry if the first segment looks like a host.
fn extract_registry_and_path(name: &str) -> (Option<String>, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first.to_string()), rest)
        }
        _ => (None, name),
    }
}

fn extract_repository_and_tag(path: &str) -> ConvoyResult<(String, Option<String>)> {
    let (repository, tag) = match path.rsplit_once(':') {
        Some((repository, tag)) => (repository, Some(tag.to_string())),
        None => (path, None),
    };

    if repository.is_empty() {
        return Err(ConvoyError::ImageNameError("repository is empty".into()));
    }

    Ok((repository.to_string(), tag))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str =
        "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn test_image_name_plain_repository() {
        let name = "ubuntu".parse::<ImageName>().unwrap();
        assert!(name.registry.is_none());
        assert_eq!(name.repository, "ubuntu");
        assert!(name.tag.is_none());
        assert_eq!(name.normalise(), "ubuntu:latest");
    }

    #[test]
    fn test_image_name_keeps_short_names_short() {
        assert_eq!(normalise("ubuntu:latest").unwrap(), "ubuntu:latest");
        assert_eq!(normalise("library/alpine:3.12").unwrap(), "library/alpine:3.12");
    }

    #[test]
    fn test_image_name_registry_with_port() {
        let name = "registry.example.com:5000/myrepo:1.0"
            .parse::<ImageName>()
            .unwrap();
        assert_eq!(name.registry.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(name.repository, "myrepo");
        assert_eq!(name.tag.as_deref(), Some("1.0"));
        assert_eq!(name.repo(), "registry.example.com:5000/myrepo");
    }

    #[test]
    fn test_image_name_localhost_registry() {
        let name = "localhost/app".parse::<ImageName>().unwrap();
        assert_eq!(name.registry.as_deref(), Some("localhost"));
        assert_eq!(name.normalise(), "localhost/app:latest");
    }

    #[test]
    fn test_image_name_digest_drops_tag_when_normalised() {
        let s = format!("registry2.balena-cloud.com/v2/abcdef:mytag@{DIGEST}");
        let name = s.parse::<ImageName>().unwrap();
        assert_eq!(name.tag.as_deref(), Some("mytag"));
        assert_eq!(
            name.normalise(),
            format!("registry2.balena-cloud.com/v2/abcdef@{DIGEST}")
        );
        assert_eq!(name.with_tag(), "registry2.balena-cloud.com/v2/abcdef:mytag");
    }

    #[test]
    fn test_image_name_repo_and_tag_defaults_to_latest() {
        let s = format!("registry2.balena-cloud.com/v2/abcdef@{DIGEST}");
        let name = s.parse::<ImageName>().unwrap();
        assert_eq!(
            name.repo_and_tag(),
            (
                "registry2.balena-cloud.com/v2/abcdef".to_string(),
                "latest".to_string()
            )
        );
    }

    #[test]
    fn test_image_name_reference_keeps_bare_repo_for_digests() {
        let s = format!("registry2.balena-cloud.com/v2/abcdef@{DIGEST}");
        let name = s.parse::<ImageName>().unwrap();
        assert_eq!(name.reference(), "registry2.balena-cloud.com/v2/abcdef");

        let name = "registry2.balena-cloud.com/v2/abcdef:v1".parse::<ImageName>().unwrap();
        assert_eq!(name.reference(), "registry2.balena-cloud.com/v2/abcdef:v1");

        let name = "ubuntu".parse::<ImageName>().unwrap();
        assert_eq!(name.reference(), "ubuntu");
    }

    #[test]
    fn test_image_name_errors() {
        assert!("".parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("input string is empty"));
        assert!("registry.example.com/:tag"
            .parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("repository is empty"));
        assert!("inva!id-registry.com/alpine:3.12"
            .parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("invalid registry"));
        assert!("Library/alpine:3.12"
            .parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("invalid repository"));
        assert!("alpine:t!ag"
            .parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("invalid tag"));
        assert!("alpine@nonsense"
            .parse::<ImageName>()
            .unwrap_err()
            .to_string()
            .contains("invalid digest"));
    }

    #[test]
    fn test_has_same_digest() {
        let a = format!("registry/one@{DIGEST}");
        let b = format!("registry/two@{DIGEST}");
        assert!(has_same_digest(Some(&a), Some(&b)));
        assert!(!has_same_digest(Some("one:latest"), Some("one:latest")));
        assert!(!has_same_digest(None, Some(&b)));
    }

    #[test]
    fn test_is_dangling() {
        let dangling = EngineImage {
            id: "sha256:1".into(),
            repo_tags: vec![NONE_REPO_TAG.into()],
            repo_digests: vec![NONE_REPO_DIGEST.into()],
        };
        assert!(is_dangling(&dangling));

        let empty = EngineImage {
            id: "sha256:2".into(),
            ..Default::default()
        };
        assert!(is_dangling(&empty));

        let tagged = EngineImage {
            id: "sha256:3".into(),
            repo_tags: vec!["ubuntu:latest".into()],
            repo_digests: vec![NONE_REPO_DIGEST.into()],
        };
        assert!(!is_dangling(&tagged));

        let digested = EngineImage {
            id: "sha256:4".into(),
            repo_tags: vec![NONE_REPO_TAG.into()],
            repo_digests: vec![format!("ubuntu@{DIGEST}")],
        };
        assert!(!is_dangling(&digested));
    }

    #[test]
    fn test_normalised_tags_skip_placeholders() {
        let image = EngineImage {
            id: "sha256:5".into(),
            repo_tags: vec!["ubuntu".into(), NONE_REPO_TAG.into()],
            repo_digests: vec![],
        };
        assert_eq!(normalised_tags(&image), vec!["ubuntu:latest".to_string()]);
    }
}
