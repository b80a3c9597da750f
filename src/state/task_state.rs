/// Task state definitions for tracking one page visit
///
/// A task moves through `Queued -> Loading -> {TimedOut, Loaded} ->
/// PostProcessing -> Done`, or ends early in `Failed`.
use crate::TrawlError;
use std::fmt;

/// Represents the current state of a task in the per-task protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in the work queue
    Queued,

    /// Navigation to the task URL is in progress
    Loading,

    /// Navigation exceeded its timeout; the page may still be usable
    TimedOut,

    /// Navigation completed normally
    Loaded,

    /// Post-load behaviors are running
    PostProcessing,

    // ===== Terminal States =====
    /// Navigation or post-processing failed
    Failed,

    /// Task finished
    Done,
}

impl TaskState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Done)
    }

    /// Returns true if the transition `self -> next` is part of the protocol
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Loading)
                | (Loading, TimedOut)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (TimedOut, PostProcessing)
                | (Loaded, PostProcessing)
                | (PostProcessing, Done)
                | (PostProcessing, Failed)
        )
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Loading => "loading",
            Self::TimedOut => "timed_out",
            Self::Loaded => "loaded",
            Self::PostProcessing => "post_processing",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the state of a single task and rejects out-of-protocol moves
#[derive(Debug)]
pub struct TaskTracker {
    url: String,
    state: TaskState,
}

impl TaskTracker {
    /// Starts tracking a task that was just taken off the queue
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: TaskState::Queued,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves the task to `next`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The transition is valid and was applied
    /// * `Err(TrawlError::InvalidTransition)` - The state is left unchanged
    pub fn advance(&mut self, next: TaskState) -> Result<(), TrawlError> {
        if !self.state.can_transition_to(next) {
            return Err(TrawlError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::trace!("{}: {} -> {}", self.url, self.state, next);
        self.state = next;
        Ok(())
    }
}
