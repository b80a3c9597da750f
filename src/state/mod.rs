//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TaskState`: the per-task protocol states (queued, loading, timed out, ...)
//! - `TaskTracker`: applies validated transitions for one task

mod task_state;

// Re-export main types
pub use task_state::{TaskState, TaskTracker};
