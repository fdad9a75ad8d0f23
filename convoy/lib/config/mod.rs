//! Configuration types and helpers.

mod agent;
mod defaults;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use agent::*;
pub use defaults::*;
