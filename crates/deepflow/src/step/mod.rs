//! Step instances and their state machine
//!
//! ```text
//!            Schedule         Start            Succeed
//!  Pending ──────────▶ Ready ───────▶ Running ─────────▶ Succeeded
//!     │                  │  ▲            │
//!     │ Skip        Skip │  │ Retry      │ Fail
//!     ▼                  ▼  │            ▼
//!  Skipped ◀──────────────  └──────── Failed ──GiveUp──▶ Failed (terminal)
//! ```
//!
//! [`StepInstance::advance`] is the only mutator. Illegal events return
//! [`FlowError::InvalidStateTransition`] and leave the instance untouched.
//! `Failed` is terminal once the failure is non-retryable, the retry budget
//! is spent, or the step gave up.

mod result;
mod state;

pub use result::StepResult;
pub use state::{StepEvent, StepState, Transition};

use chrono::{DateTime, Utc};

use crate::error::FlowError;

/// Runtime state of one step within a run
#[derive(Debug, Clone, PartialEq)]
pub struct StepInstance {
    step_id: String,
    state: StepState,
    max_retries: u32,
    retries_used: u32,
    attempts: u32,
    given_up: bool,
    backend: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    transitions: Vec<Transition>,
    result: Option<StepResult>,
    skip_reason: Option<String>,
}

impl StepInstance {
    pub fn new(step_id: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            state: StepState::Pending,
            max_retries,
            retries_used: 0,
            attempts: 0,
            given_up: false,
            backend: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            transitions: Vec::new(),
            result: None,
            skip_reason: None,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Number of attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backend used by the most recent attempt
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start of the first attempt
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Result of the most recent attempt
    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Check if a failed step may go back to `Ready`
    pub fn can_retry(&self) -> bool {
        self.state == StepState::Failed
            && !self.given_up
            && self.retries_used < self.max_retries
            && self.result.as_ref().is_some_and(StepResult::is_retryable)
    }

    /// Check if no further event can change this instance
    pub fn is_terminal(&self) -> bool {
        match self.state {
            StepState::Succeeded | StepState::Skipped => true,
            StepState::Failed => !self.can_retry(),
            _ => false,
        }
    }

    fn target_state(&self, event: &StepEvent) -> Result<StepState, FlowError> {
        let target = match (self.state, event) {
            (StepState::Pending, StepEvent::Schedule) => StepState::Ready,
            (StepState::Pending | StepState::Ready, StepEvent::Skip(_)) => StepState::Skipped,
            (StepState::Ready, StepEvent::Start) => StepState::Running,
            (StepState::Running, StepEvent::Succeed(r)) if r.success => StepState::Succeeded,
            (StepState::Running, StepEvent::Fail(r)) if !r.success => StepState::Failed,
            (StepState::Failed, StepEvent::Retry) if self.can_retry() => StepState::Ready,
            (StepState::Failed, StepEvent::GiveUp(_)) if !self.is_terminal() => StepState::Failed,
            (from, _) => {
                return Err(FlowError::InvalidStateTransition {
                    step_id: self.step_id.clone(),
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };
        Ok(target)
    }

    /// Apply an event, recording a timestamped transition
    pub fn advance(&mut self, event: StepEvent, now: DateTime<Utc>) -> Result<StepState, FlowError> {
        let from = self.state;
        let to = self.target_state(&event)?;
        let event_type = event.event_type();

        let note = match event {
            StepEvent::Start => {
                self.attempts += 1;
                self.started_at.get_or_insert(now);
                self.ended_at = None;
                None
            }
            StepEvent::Succeed(result) | StepEvent::Fail(result) => {
                self.ended_at = Some(now);
                if let Some(backend) = &result.backend_id {
                    self.backend = Some(backend.clone());
                }
                let note = result.error.as_ref().map(|e| e.to_string());
                self.result = Some(result);
                note
            }
            StepEvent::Retry => {
                self.retries_used += 1;
                None
            }
            StepEvent::GiveUp(reason) => {
                self.given_up = true;
                Some(reason)
            }
            StepEvent::Skip(reason) => {
                self.ended_at = Some(now);
                self.skip_reason = Some(reason.clone());
                Some(reason)
            }
            StepEvent::Schedule => None,
        };

        self.state = to;
        self.transitions.push(Transition {
            from,
            to,
            event: event_type.to_string(),
            at: now,
            attempt: self.attempts,
            note,
        });
        Ok(to)
    }
}
