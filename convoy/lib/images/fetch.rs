use futures::StreamExt;

use crate::{
    engine::{DeltaRequest, PullEvent, PullStream},
    log::{EventDetails, LogType},
    ConvoyError, ConvoyResult,
};

use super::{
    resolver::{self, Resolution},
    FetchOptions, Image, ImageManager, ImageState, ImageStatus,
};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageManager {
    /// Makes sure an image is on the engine, pulling it if needed.
    ///
    /// If the engine already has the image it is tagged and stored, `on_finish(true)` is called
    /// and no task is registered. Otherwise a download task is started, the image is pulled
    /// (as a delta when `options` asks for one), and `on_finish` reports whether the pull
    /// succeeded. Pull failures are reported to `on_finish` and the system logger rather than
    /// returned.
    ///
    /// ## Errors
    ///
    /// * [`ConvoyError::ImageDownloadBackoff`] if the image failed recently and its backoff
    ///   window has not elapsed. The engine is not contacted.
    /// * [`ConvoyError::InternalInconsistency`] if the image name is empty.
    /// * Any engine or database error hit while looking the image up or adopting it. These
    ///   count toward the backoff.
    pub async fn trigger_fetch<F>(
        &self,
        image: &Image,
        options: FetchOptions,
        on_finish: F,
        service_name: &str,
    ) -> ConvoyResult<()>
    where
        F: FnOnce(bool) + Send,
    {
        let image = image.normalised()?;
        self.backoff
            .check(&image.name, *self.config.get_app_update_poll_interval())?;

        let found = match resolver::resolve(self.engine.as_ref(), &self.pool, &image.name).await {
            Ok(Resolution::Found(engine_image)) => Some(engine_image),
            Ok(Resolution::NotFound) => None,
            Err(e) => {
                if !matches!(e, ConvoyError::ImageDownloadBackoff) {
                    self.backoff.record_failure(&image.name);
                }
                return Err(e);
            }
        };

        if let Some(engine_image) = found {
            tracing::debug!("image {} already on the engine as {}", image.name, engine_image.id);
            if let Err(e) = self.adopt(&image, &engine_image.id).await {
                self.backoff.record_failure(&image.name);
                return Err(e);
            }

            on_finish(true);
            return Ok(());
        }

        self.tasks.start(image.with_state(ImageState {
            status: Some(ImageStatus::Downloading),
            download_progress: Some(0),
        }));

        let success = match self.pull_and_adopt(&image, &options, service_name).await {
            Ok(()) => {
                tracing::info!("downloaded image {}", image.name);
                self.logger.log_system_event(
                    LogType::DownloadImageSuccess,
                    EventDetails::image(&image.name),
                );
                self.backoff.clear(&image.name);
                true
            }
            Err(ConvoyError::DeltaStillProcessing) => {
                self.logger
                    .log_system_event(LogType::DeltaStillProcessingError, EventDetails::default());
                false
            }
            Err(e) => {
                self.backoff.record_failure(&image.name);
                self.logger.log_system_event(
                    LogType::DownloadImageError,
                    EventDetails::image(&image.name).with_error(&e),
                );
                false
            }
        };

        self.tasks.finish(&image);
        on_finish(success);

        Ok(())
    }

    async fn pull_and_adopt(
        &self,
        image: &Image,
        options: &FetchOptions,
        service_name: &str,
    ) -> ConvoyResult<()> {
        let stream = match (&self.delta, options.delta_source.as_deref()) {
            (Some(delta), Some(source)) if options.wants_delta() => {
                self.logger.log_system_event(
                    LogType::DownloadImageDelta,
                    EventDetails::image(&image.name),
                );

                let source_id =
                    match resolver::resolve(self.engine.as_ref(), &self.pool, source).await? {
                        Resolution::Found(source_image) => source_image.id,
                        Resolution::NotFound => {
                            return Err(ConvoyError::NotFound(format!("delta source {source}")))
                        }
                    };

                let request = DeltaRequest {
                    image_name: image.name.clone(),
                    source_id,
                    service_name: service_name.to_string(),
                };
                delta.fetch_delta(request, options).await?
            }
            _ => {
                if options.wants_delta() {
                    tracing::warn!(
                        "delta requested for {} but no delta backend is configured",
                        image.name
                    );
                }

                self.logger
                    .log_system_event(LogType::DownloadImage, EventDetails::image(&image.name));
                self.engine.pull_image(&image.name, options).await?
            }
        };

        let docker_image_id = self.track_progress(&image.name, stream).await?;
        self.adopt(image, &docker_image_id).await
    }

    /// Forwards pull progress to the task registry and returns the pulled image id.
    async fn track_progress(&self, name: &str, mut stream: PullStream) -> ConvoyResult<String> {
        while let Some(event) = stream.next().await {
            match event? {
                PullEvent::Progress(percentage) => self.tasks.update(
                    name,
                    ImageState {
                        status: None,
                        download_progress: Some(percentage.min(100)),
                    },
                ),
                PullEvent::Complete(docker_image_id) => return Ok(docker_image_id),
            }
        }

        Err(ConvoyError::InternalInconsistency(format!(
            "pull of {name} ended without an image id"
        )))
    }
}
