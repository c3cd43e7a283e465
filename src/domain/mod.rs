//! Core domain records shared by the queue, scheduler, and coordinator.

mod task;
mod worker;

pub use task::{Task, TaskStatus};
pub use worker::{WorkerState, WorkerStatus};
