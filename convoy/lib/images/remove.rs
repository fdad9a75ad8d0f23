use std::time::Duration;

use rand::Rng;

use crate::{
    engine::{NONE_REPO_DIGEST, NONE_REPO_TAG},
    log::{EventDetails, LogType},
    store, ConvoyResult,
};

use super::{Image, ImageManager, ImageName, ImageState, ImageStatus};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageManager {
    /// Removes an image from the engine and forgets it.
    ///
    /// Failures are reported to the system logger and returned.
    pub async fn remove(&self, image: &Image) -> ConvoyResult<()> {
        self.remove_image_if_not_needed(image)
            .await
            .inspect_err(|e| {
                self.logger.log_system_event(
                    LogType::DeleteImageError,
                    EventDetails::image(&image.name).with_error(e),
                )
            })?;

        Ok(())
    }

    /// Removes the image stored with the given engine id.
    ///
    /// Nothing happens if no stored image has that id.
    pub async fn remove_by_docker_id(&self, docker_image_id: &str) -> ConvoyResult<()> {
        match self.get_by_docker_id(docker_image_id).await? {
            Some(image) => self.remove(&image).await,
            None => {
                tracing::debug!("no stored image with engine id {docker_image_id}");
                Ok(())
            }
        }
    }

    /// Removes every engine reference of the stored image matching `image`, then deletes the
    /// stored row.
    ///
    /// Returns whether anything was removed from the engine. An image with no stored row, or
    /// one the engine no longer has, is not an error. On any other engine error the row is
    /// kept and the error is returned.
    pub async fn remove_image_if_not_needed(&self, image: &Image) -> ConvoyResult<bool> {
        let Some(stored) = store::select_matching_images(&self.pool, image)
            .await?
            .into_iter()
            .next()
        else {
            tracing::debug!("no stored image matches {}, nothing to remove", image.name);
            return Ok(false);
        };

        let result = self.remove_from_engine(image, &stored).await;
        self.tasks.finish(image);

        let removed = match result {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        if let Some(id) = stored.id {
            store::delete_images(&self.pool, &[id]).await?;
        }

        if removed {
            self.logger
                .log_system_event(LogType::DeleteImageSuccess, EventDetails::image(&image.name));
        }

        Ok(removed)
    }

    async fn remove_from_engine(&self, image: &Image, stored: &Image) -> ConvoyResult<()> {
        let reference = stored.name.parse::<ImageName>()?.reference();

        let tags: Vec<String> = self
            .engine
            .list_images(Some(&reference))
            .await?
            .into_iter()
            .flat_map(|engine_image| engine_image.repo_tags)
            .filter(|tag| tag != NONE_REPO_TAG)
            .collect();

        self.tasks.start(image.with_state(ImageState {
            status: Some(ImageStatus::Deleting),
            download_progress: None,
        }));
        self.logger
            .log_system_event(LogType::DeleteImage, EventDetails::image(&image.name));

        // The engine fails with "unrecognized image ID" when two callers remove the last tag
        // of a shared image at the same moment.
        tokio::time::sleep(self.removal_jitter()).await;

        // Sequentially, parallel removals confuse the engine too.
        for tag in &tags {
            self.engine.remove_image(tag, false).await?;
        }

        let digests: Vec<String> = self
            .engine
            .list_images(Some(&reference))
            .await?
            .into_iter()
            .flat_map(|engine_image| engine_image.repo_digests)
            .filter(|digest| digest != NONE_REPO_DIGEST)
            .collect();

        for digest in &digests {
            self.engine.remove_image(digest, false).await?;
        }

        Ok(())
    }

    fn removal_jitter(&self) -> Duration {
        let max = u64::try_from(self.config.get_removal_jitter_max().as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(rand::rng().random_range(0..max))
    }
}
