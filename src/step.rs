//! Workflow step types.
//!
//! A [`WorkflowStep`] is one node in a request's approval pipeline. Steps
//! are linked into a chain through `previous_step_id` / `next_step_id`;
//! the chain itself is owned and validated by
//! [`WorkflowDefinition`](crate::WorkflowDefinition).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The state of a single workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not been completed. It may or may not have started.
    Pending,

    /// Step was completed successfully.
    Approved,

    /// Step was completed with a rejection.
    Rejected,

    /// Step was passed over without human action.
    Skipped,
}

impl StepState {
    /// Returns true for every state other than `Pending`.
    pub fn is_completed(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// An opaque person reference: identifier plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Stable identifier from the identity provider.
    pub id: Uuid,

    /// Human-readable name, used in notifications and status output.
    pub name: String,
}

impl Person {
    /// Creates a person reference.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// One node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Short stable id, unique within the workflow.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Predecessor, `None` for the entry step.
    pub previous_step_id: Option<String>,

    /// Successor, `None` for the terminal step.
    pub next_step_id: Option<String>,

    /// Current state of this step.
    pub state: StepState,

    /// When the workflow entered this step.
    pub started: Option<DateTime<Utc>>,

    /// When this step was completed.
    pub completed: Option<DateTime<Utc>>,

    /// Who completed the step. Never set for skipped steps.
    pub completed_by: Option<Person>,

    /// Rejection or skip rationale.
    pub reason: Option<String>,
}

impl WorkflowStep {
    /// Creates an unlinked pending step.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            previous_step_id: None,
            next_step_id: None,
            state: StepState::Pending,
            started: None,
            completed: None,
            completed_by: None,
            reason: None,
        }
    }

    /// Returns true if this is the entry step.
    pub fn is_entry(&self) -> bool {
        self.previous_step_id.is_none()
    }

    /// Returns true if this is the terminal step.
    pub fn is_terminal(&self) -> bool {
        self.next_step_id.is_none()
    }

    /// Returns true once the workflow has entered this step.
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Marks the step as entered, recording the start time.
    ///
    /// The state is reset to `Pending`; an existing start time is kept.
    pub fn start(&mut self) {
        self.state = StepState::Pending;
        if self.started.is_none() {
            self.started = Some(Utc::now());
        }
    }

    /// Completes the step with the given state.
    pub fn complete(&mut self, state: StepState, by: Option<Person>, reason: Option<String>) {
        self.state = state;
        self.completed = Some(Utc::now());
        self.completed_by = by;
        self.reason = reason;
    }

    /// Marks the step as skipped. Skips never record a completer.
    pub fn skip(&mut self, reason: Option<String>) {
        self.complete(StepState::Skipped, None, reason);
    }
}
