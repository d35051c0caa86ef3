//! Transition hooks
//!
//! Hooks observe every step transition. They are best-effort: an error or a
//! panic inside a hook is logged and swallowed, and the run continues.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::step::{StepState, Transition};

/// One observed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub run_id: Uuid,
    pub workflow: String,
    pub step_id: String,
    pub transition: Transition,
}

/// Observer of step transitions
pub trait TransitionHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_transition(&self, event: &TransitionEvent) -> Result<(), String>;
}

pub type DynHook = Arc<dyn TransitionHook>;

/// Call every hook; failures never reach the caller
pub fn dispatch(hooks: &[DynHook], event: &TransitionEvent) {
    for hook in hooks {
        match catch_unwind(AssertUnwindSafe(|| hook.on_transition(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(hook = hook.name(), step_id = %event.step_id, error = %e, "Transition hook failed"),
            Err(_) => warn!(hook = hook.name(), step_id = %event.step_id, "Transition hook panicked"),
        }
    }
}

/// Logs transitions through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl TransitionHook for TracingHook {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_transition(&self, event: &TransitionEvent) -> Result<(), String> {
        let t = &event.transition;
        match t.to {
            StepState::Succeeded | StepState::Failed | StepState::Skipped => info!(
                run_id = %event.run_id,
                step_id = %event.step_id,
                from = %t.from,
                to = %t.to,
                attempt = t.attempt,
                note = ?t.note,
                "Step transition"
            ),
            _ => debug!(
                run_id = %event.run_id,
                step_id = %event.step_id,
                from = %t.from,
                to = %t.to,
                event = %t.event,
                attempt = t.attempt,
                "Step transition"
            ),
        }
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }

    /// Events of one step, in order
    pub fn for_step(&self, step_id: &str) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.step_id == step_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl TransitionHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_transition(&self, event: &TransitionEvent) -> Result<(), String> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
