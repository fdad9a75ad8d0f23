#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use convoy::{
    config::Config,
    engine::{
        ContainerEngine, DeltaBackend, DeltaRequest, EngineImage, PullEvent, PullStream,
    },
    images::{FetchOptions, ImageManager},
    log::{EventDetails, LogType, SystemLogger},
    store, ConvoyError, ConvoyResult,
};
use futures::{stream, StreamExt};
use sqlx::{Pool, Sqlite};
use tempfile::{tempdir, TempDir};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a pull of a given image does.
#[derive(Debug, Clone)]
pub enum PullPlan {
    /// Reports the given progress, then stores the image under `id`.
    Succeed { id: String, progress: Vec<u8> },

    /// Reports some progress, then fails with the given status code.
    Fail(u16),
}

/// What a delta pull does.
#[derive(Debug, Clone)]
pub enum DeltaPlan {
    /// The delta is still being generated.
    StillProcessing,

    /// The delta applies and the engine stores the image under `id`.
    Succeed { id: String },
}

/// An in-memory container engine that records every call.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    images: Vec<EngineImage>,
    pulls: HashMap<String, PullPlan>,
    removal_failures: HashMap<String, u16>,
    inspect_failure: Option<u16>,
    calls: Vec<String>,
}

/// A delta backend that follows a fixed plan.
pub struct FakeDelta {
    engine: Arc<FakeEngine>,
    plan: DeltaPlan,
    requests: Mutex<Vec<DeltaRequest>>,
}

/// A system logger that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<(LogType, EventDetails)>>,
    messages: Mutex<Vec<(String, Option<String>)>>,
}

/// A manager over a fake engine and a throwaway database.
pub struct TestContext {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub logger: Arc<RecordingLogger>,
    pub pool: Pool<Sqlite>,
    pub manager: ImageManager,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image with the given tags and digests.
    pub fn with_image(self, id: &str, tags: &[&str], digests: &[&str]) -> Self {
        self.add_image(id, tags, digests);
        self
    }

    pub fn add_image(&self, id: &str, tags: &[&str], digests: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.images.retain(|image| image.id != id);
        state.images.push(EngineImage {
            id: id.to_string(),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            repo_digests: digests.iter().map(|d| d.to_string()).collect(),
        });
    }

    pub fn plan_pull(&self, name: &str, plan: PullPlan) {
        self.state
            .lock()
            .unwrap()
            .pulls
            .insert(name.to_string(), plan);
    }

    /// Makes removals of `name` fail with `code`.
    pub fn fail_removal(&self, name: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .removal_failures
            .insert(name.to_string(), code);
    }

    /// Makes every inspection fail with `code`.
    pub fn fail_inspections(&self, code: u16) {
        self.state.lock().unwrap().inspect_failure = Some(code);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn images(&self) -> Vec<EngineImage> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn image(&self, id: &str) -> Option<EngineImage> {
        self.images().into_iter().find(|image| image.id == id)
    }
}

impl FakeState {
    fn find(&self, name: &str) -> Option<usize> {
        self.images.iter().position(|image| {
            image.id == name
                || image.repo_tags.iter().any(|t| t == name)
                || image.repo_digests.iter().any(|d| d == name)
        })
    }
}

impl FakeDelta {
    pub fn new(engine: Arc<FakeEngine>, plan: DeltaPlan) -> Self {
        Self {
            engine,
            plan,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DeltaRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RecordingLogger {
    pub fn event_types(&self) -> Vec<LogType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(log_type, _)| *log_type)
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, Option<String>)> {
        self.messages.lock().unwrap().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_images(&self, reference: Option<&str>) -> ConvoyResult<Vec<EngineImage>> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("list:{}", reference.unwrap_or("*")));

        Ok(state
            .images
            .iter()
            .filter(|image| reference.map_or(true, |r| matches_reference(image, r)))
            .cloned()
            .collect())
    }

    async fn inspect_image(&self, name: &str) -> ConvoyResult<EngineImage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("inspect:{name}"));

        if let Some(code) = state.inspect_failure {
            return Err(ConvoyError::status(code, "server error"));
        }

        match state.find(name) {
            Some(index) => Ok(state.images[index].clone()),
            None => Err(ConvoyError::status(404, format!("no such image: {name}"))),
        }
    }

    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> ConvoyResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("tag:{image}->{repo}:{tag}"));

        let reference = format!("{repo}:{tag}");
        let index = state
            .find(image)
            .ok_or_else(|| ConvoyError::status(404, format!("no such image: {image}")))?;

        for other in state.images.iter_mut() {
            other.repo_tags.retain(|t| *t != reference);
        }
        state.images[index].repo_tags.push(reference);

        Ok(())
    }

    async fn remove_image(&self, name: &str, _force: bool) -> ConvoyResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove:{name}"));

        if let Some(code) = state.removal_failures.get(name) {
            return Err(ConvoyError::status(*code, "conflict: unable to remove"));
        }

        let index = state
            .find(name)
            .ok_or_else(|| ConvoyError::status(404, format!("no such image: {name}")))?;

        let image = &mut state.images[index];
        if image.id == name {
            state.images.remove(index);
            return Ok(());
        }

        image.repo_tags.retain(|t| t != name);
        image.repo_digests.retain(|d| d != name);
        if image.repo_tags.is_empty() && image.repo_digests.is_empty() {
            state.images.remove(index);
        }

        Ok(())
    }

    async fn pull_image(&self, name: &str, _options: &FetchOptions) -> ConvoyResult<PullStream> {
        let plan = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("pull:{name}"));
            state.pulls.get(name).cloned()
        };

        match plan {
            Some(PullPlan::Succeed { id, progress }) => {
                self.add_image(&id, &[name], &[]);
                let events: Vec<ConvoyResult<PullEvent>> = progress
                    .into_iter()
                    .map(PullEvent::Progress)
                    .chain(std::iter::once(PullEvent::Complete(id)))
                    .map(Ok)
                    .collect();
                Ok(stream::iter(events).boxed())
            }
            Some(PullPlan::Fail(code)) => {
                let events: Vec<ConvoyResult<PullEvent>> = vec![
                    Ok(PullEvent::Progress(10)),
                    Err(ConvoyError::status(code, "pull failed")),
                ];
                Ok(stream::iter(events).boxed())
            }
            None => Err(ConvoyError::status(404, format!("manifest unknown: {name}"))),
        }
    }
}

#[async_trait]
impl DeltaBackend for FakeDelta {
    async fn fetch_delta(
        &self,
        request: DeltaRequest,
        _options: &FetchOptions,
    ) -> ConvoyResult<PullStream> {
        let image_name = request.image_name.clone();
        self.requests.lock().unwrap().push(request);

        match &self.plan {
            DeltaPlan::StillProcessing => {
                let events: Vec<ConvoyResult<PullEvent>> =
                    vec![Err(ConvoyError::DeltaStillProcessing)];
                Ok(stream::iter(events).boxed())
            }
            DeltaPlan::Succeed { id } => {
                self.engine.add_image(id, &[image_name.as_str()], &[]);
                let events: Vec<ConvoyResult<PullEvent>> = vec![
                    Ok(PullEvent::Progress(50)),
                    Ok(PullEvent::Complete(id.clone())),
                ];
                Ok(stream::iter(events).boxed())
            }
        }
    }
}

impl SystemLogger for RecordingLogger {
    fn log_system_event(&self, log_type: LogType, details: EventDetails) {
        self.events.lock().unwrap().push((log_type, details));
    }

    fn log_system_message(&self, message: &str, _details: EventDetails, event_name: Option<&str>) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), event_name.map(str::to_string)));
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// A configuration with a short removal jitter.
pub fn test_config() -> Config {
    Config::builder()
        .removal_jitter_max(Duration::from_millis(5))
        .build()
}

/// Whether `reference` selects the image the way the engine's reference filter does: `repo:tag`
/// matches that tag only, a bare `repo` matches any tag or digest of the repository.
fn matches_reference(image: &EngineImage, reference: &str) -> bool {
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    if last_segment.contains(':') {
        return image.repo_tags.iter().any(|t| t == reference);
    }

    let tagged = image
        .repo_tags
        .iter()
        .filter_map(|t| t.rsplit_once(':'))
        .any(|(repo, _)| repo == reference);
    let digested = image
        .repo_digests
        .iter()
        .filter_map(|d| d.split_once('@'))
        .any(|(repo, _)| repo == reference);

    tagged || digested
}

/// Builds a manager over `engine` with a fresh database.
pub async fn setup(engine: FakeEngine, config: Config) -> anyhow::Result<TestContext> {
    let dir = tempdir()?;
    let pool = store::get_or_create_db_pool(dir.path().join("agent.db")).await?;
    let engine = Arc::new(engine);
    let logger = Arc::new(RecordingLogger::default());

    let manager = ImageManager::new(engine.clone(), pool.clone(), config).with_logger(logger.clone());

    Ok(TestContext {
        dir,
        engine,
        logger,
        pool,
        manager,
    })
}
