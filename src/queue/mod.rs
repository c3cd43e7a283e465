//! Durable, cross-process task queue.

mod error;
mod store;

pub use error::QueueError;
pub use store::{ClearFilter, TaskQueue};
