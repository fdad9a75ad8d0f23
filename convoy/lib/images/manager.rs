use std::{collections::HashSet, sync::Arc};

use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;

use crate::{
    config::Config,
    engine::{ContainerEngine, DeltaBackend},
    log::{SystemLogger, TracingLogger},
    store, ConvoyError, ConvoyResult,
};

use super::{
    resolver::{self, Resolution},
    BackoffTracker, CleanupFailures, Image, ImageChange, ImageName, ImageStatus, TaskRegistry,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Fetches, tracks, removes and garbage-collects container images.
///
/// One manager is created per process. It owns the in-flight task registry, the fetch backoff
/// records and the cleanup failure cache, none of which outlive it.
pub struct ImageManager {
    /// The container engine images live on.
    pub(super) engine: Arc<dyn ContainerEngine>,

    /// The backend delta pulls go through, if deltas are supported.
    pub(super) delta: Option<Arc<dyn DeltaBackend>>,

    /// The agent database.
    pub(super) pool: Pool<Sqlite>,

    /// Where named system events are reported.
    pub(super) logger: Arc<dyn SystemLogger>,

    /// The agent configuration.
    pub(super) config: Config,

    /// In-flight fetches and removals.
    pub(super) tasks: TaskRegistry,

    /// Fetch failure history.
    pub(super) backoff: BackoffTracker,

    /// Images that recently failed cleanup.
    pub(super) cleanup_failures: CleanupFailures,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageManager {
    /// Creates a manager that reports system events through `tracing` and has no delta backend.
    pub fn new(engine: Arc<dyn ContainerEngine>, pool: Pool<Sqlite>, config: Config) -> Self {
        Self {
            engine,
            delta: None,
            pool,
            logger: Arc::new(TracingLogger),
            tasks: TaskRegistry::new(),
            backoff: BackoffTracker::new(*config.get_backoff_increment()),
            cleanup_failures: CleanupFailures::new(*config.get_image_cleanup_error_ignore_timeout()),
            config,
        }
    }

    /// Uses the given backend for delta pulls.
    pub fn with_delta_backend(mut self, delta: Arc<dyn DeltaBackend>) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Reports system events to the given logger.
    pub fn with_logger(mut self, logger: Arc<dyn SystemLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// The agent configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The fetch failure history.
    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    /// Subscribes to status and progress changes of in-flight images.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageChange> {
        self.tasks.subscribe()
    }

    /// Returns the stored image with the given engine id, if any.
    pub async fn get_by_docker_id(&self, docker_image_id: &str) -> ConvoyResult<Option<Image>> {
        store::find_image_by_docker_id(&self.pool, docker_image_id).await
    }

    /// Returns the stored images that are present on the engine.
    pub async fn get_available(&self) -> ConvoyResult<Vec<Image>> {
        let engine_images = self.engine.list_images(None).await?;
        let images = store::select_images(&self.pool).await?;

        Ok(images
            .into_iter()
            .filter(|image| image.is_available_in(&engine_images))
            .collect())
    }

    /// Backend image ids of images being downloaded.
    pub fn get_downloading_image_ids(&self) -> Vec<i64> {
        self.tasks.downloading_image_ids()
    }

    /// Names of images being downloaded.
    pub fn get_downloading_image_names(&self) -> Vec<String> {
        self.tasks.downloading_image_names()
    }

    /// The combined image state: in-flight images first, then available images not covered by
    /// an in-flight one, marked as downloaded.
    pub async fn get_state(&self) -> ConvoyResult<Vec<Image>> {
        let running = self.tasks.running();
        let running_ids: HashSet<Option<i64>> = running.iter().map(|image| image.image_id).collect();

        let available = self
            .get_available()
            .await?
            .into_iter()
            .filter(|image| !running_ids.contains(&image.image_id))
            .map(|mut image| {
                image.status = Some(ImageStatus::Downloaded);
                image
            });

        Ok(running.into_iter().chain(available).collect())
    }

    /// Adopts an image that is already on the engine: tags it and stores its engine id.
    ///
    /// Fails with [`ConvoyError::NotFound`] if the engine does not have the image.
    pub async fn save(&self, image: &Image) -> ConvoyResult<()> {
        match resolver::resolve(self.engine.as_ref(), &self.pool, &image.name).await? {
            Resolution::Found(engine_image) => self.adopt(image, &engine_image.id).await,
            Resolution::NotFound => Err(ConvoyError::NotFound(format!("image {}", image.name))),
        }
    }

    /// Overwrites the stored fields of the rows named like `image`.
    pub async fn update(&self, image: &Image) -> ConvoyResult<()> {
        store::update_image_by_name(&self.pool, image).await?;
        Ok(())
    }

    /// Tags the engine image `docker_image_id` with the `repo:tag` of `name`.
    pub(super) async fn tag_image(&self, docker_image_id: &str, name: &str) -> ConvoyResult<()> {
        let (repo, tag) = name.parse::<ImageName>()?.repo_and_tag();
        self.engine.tag_image(docker_image_id, &repo, &tag).await
    }

    /// Tags the engine image and records it against `image`.
    pub(super) async fn adopt(&self, image: &Image, docker_image_id: &str) -> ConvoyResult<()> {
        self.tag_image(docker_image_id, &image.name).await?;

        let mut image = image.clone();
        image.docker_image_id = Some(docker_image_id.to_string());
        store::upsert_image(&self.pool, &image).await
    }
}
