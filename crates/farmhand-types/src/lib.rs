//! Shared types for the Farmhand crop analysis service.

mod analysis;
mod history;
mod language;

pub use analysis::*;
pub use history::*;
pub use language::*;
