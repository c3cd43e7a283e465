//! Dependency-aware task scheduling.

mod dag;

pub use dag::DagScheduler;
