//! Process-wide orchestration: binds the workers to the queue and serializes
//! all writes to the shared trunk.

mod config;
mod core;

pub use config::CoordinatorConfig;
pub use core::{ConflictResolver, Coordinator};
