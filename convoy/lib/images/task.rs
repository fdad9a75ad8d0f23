use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::broadcast;

use super::{Image, ImageState, ImageStatus};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many change notifications a slow subscriber may lag behind before missing some.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle of a single fetch or removal.
///
/// Transitions are pure: they return the next task and whether anything externally visible
/// changed. `Finished` is absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTask {
    /// The task is in progress.
    Running(Image),

    /// The task has completed.
    Finished(Image),
}

/// What happened to a tracked image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A fetch or removal started.
    Start,

    /// Status or progress changed.
    Update,

    /// The task finished.
    Finish,
}

/// A notification that a tracked image's status or progress changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChange {
    /// What happened.
    pub kind: ChangeKind,

    /// The image snapshot after the change.
    pub image: Image,
}

/// The in-memory map of in-flight image tasks, keyed by image name.
///
/// At most one task per name is tracked. Starting a second task for a name that is already
/// tracked replaces the first (last write wins), so two concurrent fetches of the same image
/// interleave their updates on one entry.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, ImageTask>>,
    events: broadcast::Sender<ImageChange>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageTask {
    /// Creates a running task.
    pub fn new(context: Image) -> Self {
        ImageTask::Running(context)
    }

    /// The image snapshot the task carries.
    pub fn context(&self) -> &Image {
        match self {
            ImageTask::Running(context) | ImageTask::Finished(context) => context,
        }
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, ImageTask::Finished(_))
    }

    /// Merges the supplied fields into a running task.
    ///
    /// The flag is true only if status or progress was supplied.
    pub fn update(&self, change: ImageState) -> (ImageTask, bool) {
        match self {
            ImageTask::Running(context) => {
                let changed = change.status.is_some() || change.download_progress.is_some();
                (ImageTask::Running(context.with_state(change)), changed)
            }
            ImageTask::Finished(_) => (self.clone(), false),
        }
    }

    /// Finishes the task. Reports a change only the first time.
    pub fn finish(&self) -> (ImageTask, bool) {
        match self {
            ImageTask::Running(context) => (ImageTask::Finished(context.clone()), true),
            ImageTask::Finished(_) => (self.clone(), false),
        }
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tasks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageChange> {
        self.events.subscribe()
    }

    /// Registers a running task for the image and announces it.
    pub fn start(&self, image: Image) {
        self.lock()
            .insert(image.name.clone(), ImageTask::new(image.clone()));
        self.emit(ChangeKind::Start, image);
    }

    /// Applies a partial update to the task tracked under `name`, if any.
    pub fn update(&self, name: &str, state: ImageState) {
        let changed = {
            let mut tasks = self.lock();
            let Some(current) = tasks.get(name) else {
                return;
            };

            let (next, changed) = current.update(state);
            let context = next.context().clone();
            tasks.insert(name.to_string(), next);
            changed.then_some(context)
        };

        if let Some(image) = changed {
            self.emit(ChangeKind::Update, image);
        }
    }

    /// Finishes and forgets the task tracked under the image's name, if any.
    pub fn finish(&self, image: &Image) {
        let finished = self.lock().remove(&image.name).and_then(|current| {
            let (next, changed) = current.finish();
            changed.then(|| next.context().clone())
        });

        if let Some(image) = finished {
            self.emit(ChangeKind::Finish, image);
        }
    }

    /// Snapshots of every tracked task.
    pub fn running(&self) -> Vec<Image> {
        self.lock().values().map(|t| t.context().clone()).collect()
    }

    /// Backend image ids of images being downloaded.
    pub fn downloading_image_ids(&self) -> Vec<i64> {
        self.downloading()
            .into_iter()
            .filter_map(|image| image.image_id)
            .collect()
    }

    /// Names of images being downloaded.
    pub fn downloading_image_names(&self) -> Vec<String> {
        self.downloading()
            .into_iter()
            .map(|image| image.name)
            .collect()
    }

    fn downloading(&self) -> Vec<Image> {
        self.lock()
            .values()
            .map(ImageTask::context)
            .filter(|image| image.status == Some(ImageStatus::Downloading))
            .cloned()
            .collect()
    }

    fn emit(&self, kind: ChangeKind, image: Image) {
        // No subscribers is fine.
        let _ = self.events.send(ImageChange { kind, image });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ImageTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
