use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::result::StepResult;

/// Lifecycle states of a step instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepState {
    /// States no event other than `Retry`/`GiveUp` (for `Failed`) can leave
    pub fn is_final_kind(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Events that drive step state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Dependencies satisfied, step may be dispatched
    Schedule,
    /// An attempt begins
    Start,
    /// The attempt produced a result
    Succeed(StepResult),
    /// The attempt failed; the result carries the error
    Fail(StepResult),
    /// Go back to `Ready` for another attempt
    Retry,
    /// Stop retrying a failed step, making the failure terminal
    GiveUp(String),
    /// Not run (condition false, unusable input, no satisfied path)
    Skip(String),
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Start => "start",
            Self::Succeed(_) => "succeed",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::GiveUp(_) => "give_up",
            Self::Skip(_) => "skip",
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StepState,
    pub to: StepState,
    pub event: String,
    pub at: DateTime<Utc>,
    /// Attempt number at the time of the transition
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
