//! The image lifecycle.
//!
//! [`ImageManager`] decides whether an image has to be pulled, pulls it (as a delta when
//! possible), tags and records it, removes images that are no longer needed, and
//! garbage-collects dangling and stale engine images. Progress of in-flight fetches and
//! removals is published through [`ImageManager::subscribe`].

mod backoff;
mod cleanup;
mod fetch;
mod manager;
mod model;
mod name;
mod remove;
mod resolver;
mod task;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use backoff::*;
pub use cleanup::*;
pub use manager::*;
pub use model::*;
pub use name::*;
pub use resolver::*;
pub use task::*;
