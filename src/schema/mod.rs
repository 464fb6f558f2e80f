//! Field resolution schema
//!
//! Paths into raw source records, the coercions applied to them, and the
//! per-entity-kind catalog of where each metric may be found.

mod catalog;
mod path;

pub use catalog::*;
pub use path::*;
