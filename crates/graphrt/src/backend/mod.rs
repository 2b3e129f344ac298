//! Backend abstraction: per-target validation, storage creation and node compilation.

pub mod registry;
pub mod spec;
