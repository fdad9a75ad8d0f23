use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    log::{EventDetails, LogType},
    store, ConvoyResult,
};

use super::{is_dangling, ImageManager, ImageName};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The repository the agent image was published under before it moved to `balena/`.
const LEGACY_AGENT_NAMESPACE: &str = "resin/";

const AGENT_NAMESPACE: &str = "balena/";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Engine image ids whose cleanup failed recently, with the time of the failure.
///
/// An id is skipped by cleanup until its failure is older than the ignore window.
#[derive(Debug)]
pub struct CleanupFailures {
    ignore_timeout: Duration,
    failures: Mutex<HashMap<String, Instant>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CleanupFailures {
    /// Creates an empty cache with the given ignore window.
    pub fn new(ignore_timeout: Duration) -> Self {
        Self {
            ignore_timeout,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a cleanup failure now.
    pub fn record_failure(&self, id: &str) {
        self.record_failure_at(id, Instant::now());
    }

    /// Records a cleanup failure at the given instant.
    pub fn record_failure_at(&self, id: &str, at: Instant) {
        self.lock().insert(id.to_string(), at);
    }

    /// Forgets a failure.
    pub fn clear(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Whether the id failed within the ignore window.
    pub fn is_ignored(&self, id: &str) -> bool {
        self.is_ignored_at(id, Instant::now())
    }

    /// Like [`CleanupFailures::is_ignored`], evaluated at the given instant.
    pub fn is_ignored_at(&self, id: &str, now: Instant) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|failed_at| now.saturating_duration_since(*failed_at) <= self.ignore_timeout)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageManager {
    /// Engine image ids that cleanup would remove.
    ///
    /// These are dangling images no stored image points at, and images from the agent's own
    /// repository with a tag other than the one the agent runs, except the image the agent
    /// is running from. Ids that failed cleanup recently are left out.
    pub async fn get_images_for_cleanup(&self) -> ConvoyResult<Vec<String>> {
        let agent_image = self.config.get_agent_image();
        let agent_name = agent_image.parse::<ImageName>()?;
        let agent_tag = agent_name.tag_or_default();

        let mut agent_repos = vec![agent_name.get_repository().clone()];
        if let Some(rest) = agent_name.get_repository().strip_prefix(AGENT_NAMESPACE) {
            agent_repos.push(format!("{LEGACY_AGENT_NAMESPACE}{rest}"));
        }

        let running_id = match self.engine.inspect_image(agent_image).await {
            Ok(image) => Some(image.id),
            Err(e) if e.is_not_found() => {
                tracing::warn!("agent image {agent_image} not found, skipping stale agent images");
                None
            }
            Err(e) => return Err(e),
        };
        let used_ids = store::select_docker_image_ids(&self.pool).await?;

        let mut candidates: Vec<String> = Vec::new();
        for image in self.engine.list_images(None).await? {
            let candidate = if is_dangling(&image) {
                !used_ids.contains(&image.id)
            } else {
                match &running_id {
                    Some(running_id) if *running_id != image.id => {
                        image.repo_tags.iter().any(|tag| {
                            tag.parse::<ImageName>().is_ok_and(|name| {
                                agent_repos.contains(name.get_repository())
                                    && name.tag_or_default() != agent_tag
                            })
                        })
                    }
                    _ => false,
                }
            };

            if candidate && !candidates.contains(&image.id) {
                candidates.push(image.id);
            }
        }

        candidates.retain(|id| !self.cleanup_failures.is_ignored(id));
        Ok(candidates)
    }

    /// Whether cleanup has anything to remove.
    pub async fn is_cleanup_needed(&self) -> ConvoyResult<bool> {
        Ok(!self.get_images_for_cleanup().await?.is_empty())
    }

    /// Force-removes every cleanup candidate.
    ///
    /// A failed removal is reported and the image is skipped for the ignore window; the other
    /// candidates are still processed.
    pub async fn cleanup(&self) -> ConvoyResult<()> {
        for id in self.get_images_for_cleanup().await? {
            tracing::debug!("cleaning up {id}");
            match self.engine.remove_image(&id, true).await {
                Ok(()) => self.cleanup_failures.clear(&id),
                Err(e) => {
                    let ignore_for = self.config.get_image_cleanup_error_ignore_timeout();
                    self.logger.log_system_message(
                        &format!(
                            "Error cleaning up {id}: {e} - will ignore for {}s",
                            ignore_for.as_secs()
                        ),
                        EventDetails::default().with_error(&e),
                        Some(LogType::ImageCleanupError.event_name()),
                    );
                    self.cleanup_failures.record_failure(&id);
                }
            }
        }

        Ok(())
    }

    /// Repairs the stored images against the engine.
    ///
    /// Fills in missing engine ids from images matching by tag or digest, re-tags images that
    /// are present (ignoring failures), and deletes rows whose image is gone from the engine.
    pub async fn clean_image_data(&self) -> ConvoyResult<()> {
        let engine_images = self.engine.list_images(None).await?;
        let mut images = store::select_images(&self.pool).await?;

        for image in images.iter_mut().filter(|i| i.docker_image_id.is_none()) {
            let Some(engine_image) = engine_images
                .iter()
                .find(|engine_image| image.matches_tag_or_digest(engine_image))
            else {
                continue;
            };

            if let Some(id) = image.id {
                store::set_docker_image_id(&self.pool, id, &engine_image.id).await?;
            }
            image.docker_image_id = Some(engine_image.id.clone());
        }

        let (available, missing): (Vec<_>, Vec<_>) = images
            .into_iter()
            .partition(|image| image.is_available_in(&engine_images));

        for image in &available {
            if let Some(docker_image_id) = &image.docker_image_id {
                if let Err(e) = self.tag_image(docker_image_id, &image.name).await {
                    tracing::warn!("ignoring failure to re-tag {}: {e}", image.name);
                }
            }
        }

        let missing_ids: Vec<i64> = missing.iter().filter_map(|image| image.id).collect();
        if !missing_ids.is_empty() {
            tracing::info!("forgetting {} images missing from the engine", missing_ids.len());
        }
        store::delete_images(&self.pool, &missing_ids).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
