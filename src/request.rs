//! Personnel request model.
//!
//! This is the slice of a request that the lifecycle engine reads and
//! writes. Everything else about a request (descriptions, attachments,
//! comments) lives outside this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{Person, WorkflowStep, WorkflowVariant};

/// Key under which a location change appears in [`Request::proposed_changes`].
pub const LOCATION_CHANGE_KEY: &str = "location";

/// How the identity provider classifies a person's account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountClassification {
    /// Regular employee.
    Employee,
    /// External hire.
    External,
    /// Consultant.
    Consultant,
    /// Locally managed account.
    Local,
    /// Service principal or application.
    Application,
}

impl AccountClassification {
    /// Returns true for accounts that bypass human proposal and approval.
    pub fn bypasses_review(self) -> bool {
        matches!(self, Self::External | Self::Consultant)
    }
}

/// The person proposed to fill a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedPerson {
    /// Who is proposed.
    pub person: Person,
    /// Their account classification.
    pub account_classification: AccountClassification,
}

/// Sub-type of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationKind {
    /// Task owner requests, resource owner proposes, task owner approves.
    Normal,
    /// Resource owner assigns directly.
    Direct,
    /// Joint-venture staffing.
    JointVenture,
}

/// The request family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Internal personnel allocation.
    Allocation(AllocationKind),
    /// Personnel supplied by a contractor.
    ContractorPersonnel,
}

/// Request-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    /// Created, no workflow attached.
    Draft,
    /// Workflow attached and not finished.
    Active,
    /// Terminal step approved.
    Completed,
    /// Rejected at some step.
    Rejected,
}

/// A workflow as it is persisted alongside its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedWorkflow {
    /// Which variant built the workflow.
    pub variant: WorkflowVariant,
    /// Variant version at construction.
    pub version: u32,
    /// The step the request currently sits on.
    pub current_step_id: String,
    /// Step rows in chain order.
    pub steps: Vec<WorkflowStep>,
}

/// A personnel request as consumed by the lifecycle engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request identifier.
    pub id: Uuid,
    /// Family and sub-type; selects the workflow variant.
    pub request_type: RequestType,
    /// Owning project in the org chart.
    pub project_id: Uuid,
    /// Requested discipline.
    pub discipline: Option<String>,
    /// Org-chart position the request staffs.
    pub position_id: Option<Uuid>,
    /// Location resolved from the position instance.
    pub location_id: Option<Uuid>,
    /// Location before the proposed changes, if any was set.
    pub previous_location_id: Option<Uuid>,
    /// Department that owns the request, set by routing or explicitly.
    pub assigned_department: Option<String>,
    /// Proposed person, if one has been proposed.
    pub proposed_person: Option<ProposedPerson>,
    /// Field-level changes proposed to the position instance.
    pub proposed_changes: BTreeMap<String, JsonValue>,
    /// Who created the request.
    pub created_by: Person,
    /// Request-level state.
    pub state: RequestState,
    /// Attached workflow, `None` while in draft.
    pub workflow: Option<PersistedWorkflow>,
    /// Optimistic-concurrency version, bumped on every save.
    pub version: u64,
}

impl Request {
    /// Creates a draft request.
    pub fn new(request_type: RequestType, project_id: Uuid, created_by: Person) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_type,
            project_id,
            discipline: None,
            position_id: None,
            location_id: None,
            previous_location_id: None,
            assigned_department: None,
            proposed_person: None,
            proposed_changes: BTreeMap::new(),
            created_by,
            state: RequestState::Draft,
            workflow: None,
            version: 0,
        }
    }

    /// Sets the discipline.
    pub fn with_discipline(mut self, discipline: impl Into<String>) -> Self {
        self.discipline = Some(discipline.into());
        self
    }

    /// Sets the org-chart position.
    pub fn with_position(mut self, position_id: Uuid) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Sets the resolved location.
    pub fn with_location(mut self, location_id: Uuid) -> Self {
        self.location_id = Some(location_id);
        self
    }

    /// Assigns a department up front, bypassing routing.
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.assigned_department = Some(department.into());
        self
    }

    /// Sets the proposed person.
    pub fn with_proposed_person(
        mut self,
        person: Person,
        account_classification: AccountClassification,
    ) -> Self {
        self.proposed_person = Some(ProposedPerson {
            person,
            account_classification,
        });
        self
    }

    /// Records a proposed field change.
    pub fn with_proposed_change(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.proposed_changes.insert(field.into(), value);
        self
    }

    /// Returns the id of the step the request currently sits on.
    ///
    /// `None` means the workflow has not started.
    pub fn current_step_id(&self) -> Option<&str> {
        self.workflow.as_ref().map(|w| w.current_step_id.as_str())
    }

    /// Returns true while the request has no workflow attached.
    pub fn is_draft(&self) -> bool {
        matches!(self.state, RequestState::Draft)
    }
}
