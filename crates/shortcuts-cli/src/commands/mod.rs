//! CLI command implementations

pub mod collection;
pub mod maintenance;
pub mod queue;
