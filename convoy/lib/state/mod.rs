//! Target application state and its persisted form.
//!
//! [`DbFormat`] maps the nested [`TargetApps`] tree onto flattened `app` rows and back.

mod db_format;
mod target;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db_format::*;
pub use target::*;
