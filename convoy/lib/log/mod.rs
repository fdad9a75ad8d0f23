//! Structured system logging.
//!
//! Discrete, named system events (downloads, deletions, cleanup failures) go through a
//! [`SystemLogger`]. The default [`TracingLogger`] forwards them to `tracing`.

mod logger;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use logger::*;
pub use types::*;
