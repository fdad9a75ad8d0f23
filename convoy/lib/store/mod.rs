//! Persistence for images and target state.

mod apps;
mod db;
mod images;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use apps::*;
pub use db::*;
pub use images::*;
