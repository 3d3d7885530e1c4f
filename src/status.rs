//! Request status reporting and visualization.
//!
//! This module provides [`WorkflowStatus`] for inspecting where a request
//! is in its workflow.

use std::fmt;

use crate::{PersistedWorkflow, Person, RequestState, StepState, WorkflowStep, WorkflowVariant};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status entry for a single workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatusEntry {
    /// The step id.
    pub id: String,
    /// The step's display name.
    pub name: String,
    /// The step's state.
    pub state: StepState,
    /// When the workflow entered this step.
    pub started_at: Option<DateTime<Utc>>,
    /// When this step completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Who completed the step.
    pub completed_by: Option<Person>,
    /// Rejection or skip rationale.
    pub reason: Option<String>,
}

impl StepStatusEntry {
    /// Creates a status entry from a workflow step.
    pub fn from_step(step: &WorkflowStep) -> Self {
        Self {
            id: step.id.clone(),
            name: step.name.clone(),
            state: step.state,
            started_at: step.started,
            completed_at: step.completed,
            completed_by: step.completed_by.clone(),
            reason: step.reason.clone(),
        }
    }

    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        match self.state {
            StepState::Pending if self.started_at.is_some() => '⏳', // Hourglass
            StepState::Pending => '·',
            StepState::Approved => '✅',
            StepState::Rejected => '❌',
            StepState::Skipped => '⏭',
        }
    }
}

/// A snapshot of a request's workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStatus {
    /// The request's identifier.
    pub request_id: Uuid,
    /// The request-level state.
    pub request_state: RequestState,
    /// The workflow variant.
    pub variant: WorkflowVariant,
    /// The step the request sits on.
    pub current_step_id: String,
    /// Status of each step in chain order.
    pub steps: Vec<StepStatusEntry>,
}

impl WorkflowStatus {
    /// Builds a snapshot from a persisted workflow.
    pub fn new(request_id: Uuid, request_state: RequestState, workflow: &PersistedWorkflow) -> Self {
        Self {
            request_id,
            request_state,
            variant: workflow.variant,
            current_step_id: workflow.current_step_id.clone(),
            steps: workflow.steps.iter().map(StepStatusEntry::from_step).collect(),
        }
    }

    /// Returns the current step's entry.
    pub fn current(&self) -> Option<&StepStatusEntry> {
        self.steps.iter().find(|s| s.id == self.current_step_id)
    }

    /// Returns true if the request completed its lifecycle.
    pub fn is_complete(&self) -> bool {
        matches!(self.request_state, RequestState::Completed)
    }

    /// Returns true if the request was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self.request_state, RequestState::Rejected)
    }

    /// Returns the ids of steps that were skipped.
    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Skipped)
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Returns the share of steps that are no longer pending, as a
    /// percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.steps.is_empty() {
            return 100.0;
        }

        let completed = self
            .steps
            .iter()
            .filter(|s| s.state.is_completed())
            .count();

        (completed as f32 / self.steps.len() as f32) * 100.0
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Request {} ({}):", self.request_id, self.variant)?;
        writeln!(f)?;

        for step in &self.steps {
            let marker = if step.id == self.current_step_id { '>' } else { ' ' };
            let time_str = step
                .completed_at
                .or(step.started_at)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            write!(
                f,
                "{} {} {:<20} {:<10} {}",
                marker,
                step.status_char(),
                step.id,
                step.state,
                time_str
            )?;

            if let Some(ref by) = step.completed_by {
                write!(f, "  by {}", by.name)?;
            }
            if let Some(ref reason) = step.reason {
                write!(f, "  ({})", reason)?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {:.0}%", self.progress_percent())?;
        match self.request_state {
            RequestState::Draft => writeln!(f, "Status: Draft")?,
            RequestState::Active => writeln!(f, "Status: At {}", self.current_step_id)?,
            RequestState::Completed => writeln!(f, "Status: Complete")?,
            RequestState::Rejected => writeln!(f, "Status: Rejected at {}", self.current_step_id)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SkipContext, WorkflowVariant};

    fn creator() -> Person {
        Person::new(Uuid::new_v4(), "Ola Nordmann")
    }

    fn active_status() -> WorkflowStatus {
        let variant = WorkflowVariant::Normal;
        let workflow = variant
            .new_workflow(creator(), &SkipContext::empty())
            .unwrap();
        WorkflowStatus::new(Uuid::new_v4(), RequestState::Active, &variant.persist(&workflow))
    }

    #[test]
    fn test_new_workflow_status() {
        let status = active_status();
        assert_eq!(status.steps.len(), 4);
        assert_eq!(status.current().unwrap().id, "proposal");
        assert!(!status.is_complete());
        assert!(!status.is_rejected());
        assert_eq!(status.progress_percent(), 25.0);
    }

    #[test]
    fn test_status_chars() {
        let status = active_status();
        let chars: Vec<_> = status.steps.iter().map(|s| s.status_char()).collect();
        assert_eq!(chars, vec!['✅', '⏳', '·', '·']);
    }

    #[test]
    fn test_skipped_steps() {
        let mut status = active_status();
        status.steps[2].state = StepState::Skipped;
        assert_eq!(status.skipped_steps(), vec!["approval"]);
        assert_eq!(status.steps[2].status_char(), '⏭');
    }

    #[test]
    fn test_display_marks_current_step() {
        let status = active_status();
        let display = format!("{}", status);

        assert!(display.contains("allocation-normal"));
        assert!(display.contains("by Ola Nordmann"));
        assert!(display.contains("Status: At proposal"));

        let current_line = display
            .lines()
            .find(|l| l.contains("proposal") && !l.starts_with("Status"))
            .unwrap();
        assert!(current_line.starts_with('>'));

        let created_line = display.lines().find(|l| l.contains("created")).unwrap();
        assert!(created_line.starts_with(' '));
    }

    #[test]
    fn test_display_rejected() {
        let mut status = active_status();
        status.request_state = RequestState::Rejected;
        status.steps[1].state = StepState::Rejected;
        status.steps[1].reason = Some("no capacity".to_string());

        let display = format!("{}", status);
        assert!(display.contains("Rejected at proposal"));
        assert!(display.contains("(no capacity)"));
    }
}
