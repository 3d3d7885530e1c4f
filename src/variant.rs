//! Concrete workflow variants.
//!
//! Each [`WorkflowVariant`] is a named, versioned step chain. Variants
//! differ only in which steps exist and which skip conditions are attached
//! to them; the engine treats all of them the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::request::{PersistedWorkflow, RequestType, LOCATION_CHANGE_KEY};
use crate::workflow::{SkipCondition, SkipContext};
use crate::{AllocationKind, Person, ReqflowError, Result, WorkflowDefinition};

/// Entry step of every variant.
pub const CREATED_STEP: &str = "created";
/// Resource owner proposes a person.
pub const PROPOSAL_STEP: &str = "proposal";
/// Task owner accepts the proposal. Landing here auto-accepts the proposed person.
pub const APPROVAL_STEP: &str = "approval";
/// Terminal step of every variant.
pub const PROVISIONING_STEP: &str = "provisioning";
/// Contractor confirms the supplied person.
pub const CONTRACTOR_APPROVAL_STEP: &str = "contractor-approval";
/// Company representative approves the contractor's person.
pub const COMPANY_APPROVAL_STEP: &str = "company-approval";

/// Skips a step when the proposed person is an external hire or consultant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewBypassed;

impl SkipCondition for ReviewBypassed {
    fn should_skip(&self, ctx: &SkipContext<'_>) -> bool {
        ctx.proposed_person
            .is_some_and(|p| p.account_classification.bypasses_review())
    }

    fn reason(&self) -> &str {
        "proposed person's account does not require review"
    }
}

/// Skips approval when nothing needs approving: no proposed changes, or
/// only a location change where no location was previously set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoApprovalNeeded;

impl SkipCondition for NoApprovalNeeded {
    fn should_skip(&self, ctx: &SkipContext<'_>) -> bool {
        let changes = ctx.proposed_changes;
        if changes.is_empty() {
            return true;
        }
        let only_location = changes.len() == 1 && changes.contains_key(LOCATION_CHANGE_KEY);
        only_location && ctx.previous_location_id.is_none()
    }

    fn reason(&self) -> &str {
        "no changes requiring approval were proposed"
    }
}

/// The workflow variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowVariant {
    /// created → proposal → approval → provisioning; approval skippable.
    Normal,
    /// Same chain; proposal and approval skipped for external hires.
    Direct,
    /// Same chain as normal.
    JointVenture,
    /// created → contractor-approval → company-approval → provisioning.
    ContractorPersonnel,
}

impl WorkflowVariant {
    /// Every variant.
    pub const ALL: [Self; 4] = [
        Self::Normal,
        Self::Direct,
        Self::JointVenture,
        Self::ContractorPersonnel,
    ];

    /// Selects the variant for a request type.
    pub fn for_request_type(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Allocation(AllocationKind::Normal) => Self::Normal,
            RequestType::Allocation(AllocationKind::Direct) => Self::Direct,
            RequestType::Allocation(AllocationKind::JointVenture) => Self::JointVenture,
            RequestType::ContractorPersonnel => Self::ContractorPersonnel,
        }
    }

    /// Stable identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::Normal => "allocation-normal",
            Self::Direct => "allocation-direct",
            Self::JointVenture => "allocation-joint-venture",
            Self::ContractorPersonnel => "contractor-personnel",
        }
    }

    /// Current version of the variant's step chain.
    pub fn version(self) -> u32 {
        1
    }

    /// Builds the variant's step chain without starting it.
    pub fn definition(self) -> WorkflowDefinition {
        let builder = WorkflowDefinition::builder(self.id(), self.version())
            .step(CREATED_STEP, "Created");

        let builder = match self {
            Self::Normal | Self::JointVenture => builder
                .step(PROPOSAL_STEP, "Proposal")
                .step(APPROVAL_STEP, "Approval")
                .skip_if(NoApprovalNeeded),
            Self::Direct => builder
                .step(PROPOSAL_STEP, "Proposal")
                .skip_if(ReviewBypassed)
                .step(APPROVAL_STEP, "Approval")
                .skip_if(ReviewBypassed),
            Self::ContractorPersonnel => builder
                .step(CONTRACTOR_APPROVAL_STEP, "Contractor approval")
                .step(COMPANY_APPROVAL_STEP, "Company approval"),
        };

        builder.step(PROVISIONING_STEP, "Provisioning").build()
    }

    /// Builds and starts a workflow: entry completed by `creator`, first
    /// successor pending, skip chain applied.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`WorkflowDefinition::begin`].
    pub fn new_workflow(self, creator: Person, ctx: &SkipContext<'_>) -> Result<WorkflowDefinition> {
        let mut workflow = self.definition();
        workflow.begin(creator, ctx)?;
        Ok(workflow)
    }

    /// Rebuilds a workflow from its persisted rows.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::InvalidWorkflow`] if the persisted version
    /// differs from the current one, or any error from
    /// [`WorkflowDefinition::restore`].
    pub fn restore(persisted: &PersistedWorkflow) -> Result<WorkflowDefinition> {
        let variant = persisted.variant;
        if persisted.version != variant.version() {
            return Err(ReqflowError::InvalidWorkflow(format!(
                "workflow '{}' was persisted at version {} but version {} is current",
                variant.id(),
                persisted.version,
                variant.version()
            )));
        }
        let mut workflow = variant.definition();
        workflow.restore(&persisted.current_step_id, &persisted.steps)?;
        Ok(workflow)
    }

    /// Captures a workflow's rows for persistence.
    pub fn persist(self, workflow: &WorkflowDefinition) -> PersistedWorkflow {
        PersistedWorkflow {
            variant: self,
            version: workflow.version(),
            current_step_id: workflow.current().id.clone(),
            steps: workflow.steps().cloned().collect(),
        }
    }
}

impl fmt::Display for WorkflowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for WorkflowVariant {
    type Err = ReqflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.id() == s)
            .ok_or_else(|| ReqflowError::InvalidWorkflow(format!("unknown workflow variant '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{AccountClassification, Request};
    use crate::StepState;
    use serde_json::json;
    use uuid::Uuid;

    fn person(name: &str) -> Person {
        Person::new(Uuid::new_v4(), name)
    }

    fn request(kind: AllocationKind) -> Request {
        Request::new(RequestType::Allocation(kind), Uuid::new_v4(), person("creator"))
    }

    fn states(workflow: &WorkflowDefinition) -> Vec<(String, StepState)> {
        workflow.steps().map(|s| (s.id.clone(), s.state)).collect()
    }

    #[test]
    fn test_every_variant_has_one_entry_and_one_terminal() {
        for variant in WorkflowVariant::ALL {
            let workflow = variant.definition();
            assert_eq!(workflow.steps().filter(|s| s.is_entry()).count(), 1, "{variant}");
            assert_eq!(workflow.steps().filter(|s| s.is_terminal()).count(), 1, "{variant}");
        }
    }

    #[test]
    fn test_every_variant_is_fully_connected() {
        for variant in WorkflowVariant::ALL {
            let workflow = variant.definition();
            let count = workflow.step_count();

            let mut hops = 0;
            let mut cursor = workflow.entry().clone();
            while let Some(next) = workflow.next_step(&cursor.id).unwrap() {
                cursor = next.clone();
                hops += 1;
                assert!(hops <= count, "{variant} forward traversal did not terminate");
            }
            assert_eq!(cursor.id, workflow.terminal().id);
            assert_eq!(hops + 1, count);

            let mut cursor = workflow.terminal().clone();
            while let Some(prev) = workflow.previous_step(&cursor.id).unwrap() {
                cursor = prev.clone();
            }
            assert_eq!(cursor.id, CREATED_STEP);
            assert_eq!(workflow.terminal().id, PROVISIONING_STEP);
        }
    }

    #[test]
    fn test_for_request_type() {
        assert_eq!(
            WorkflowVariant::for_request_type(RequestType::Allocation(AllocationKind::Direct)),
            WorkflowVariant::Direct
        );
        assert_eq!(
            WorkflowVariant::for_request_type(RequestType::ContractorPersonnel),
            WorkflowVariant::ContractorPersonnel
        );
    }

    #[test]
    fn test_direct_external_lands_on_provisioning() {
        let req = request(AllocationKind::Direct)
            .with_proposed_person(person("Ext"), AccountClassification::External);
        let workflow = WorkflowVariant::Direct
            .new_workflow(person("creator"), &SkipContext::from_request(&req))
            .unwrap();

        assert_eq!(
            states(&workflow),
            vec![
                (CREATED_STEP.to_string(), StepState::Approved),
                (PROPOSAL_STEP.to_string(), StepState::Skipped),
                (APPROVAL_STEP.to_string(), StepState::Skipped),
                (PROVISIONING_STEP.to_string(), StepState::Pending),
            ]
        );
        assert_eq!(workflow.current().id, PROVISIONING_STEP);
        assert!(workflow.current().is_started());
    }

    #[test]
    fn test_direct_employee_waits_for_proposal() {
        let req = request(AllocationKind::Direct)
            .with_proposed_person(person("Emp"), AccountClassification::Employee);
        let workflow = WorkflowVariant::Direct
            .new_workflow(person("creator"), &SkipContext::from_request(&req))
            .unwrap();
        assert_eq!(workflow.current().id, PROPOSAL_STEP);
        assert_eq!(workflow.current().state, StepState::Pending);
    }

    #[test]
    fn test_normal_never_skips_proposal() {
        let req = request(AllocationKind::Normal)
            .with_proposed_person(person("Ext"), AccountClassification::Consultant);
        let workflow = WorkflowVariant::Normal
            .new_workflow(person("creator"), &SkipContext::from_request(&req))
            .unwrap();
        assert_eq!(workflow.current().id, PROPOSAL_STEP);
        assert!(!workflow.has_skip_condition(PROPOSAL_STEP));
        assert!(workflow.has_skip_condition(APPROVAL_STEP));
    }

    #[test]
    fn test_normal_skips_approval_without_changes() {
        let req = request(AllocationKind::Normal);
        let ctx = SkipContext::from_request(&req);
        let mut workflow = WorkflowVariant::Normal
            .new_workflow(person("creator"), &ctx)
            .unwrap();

        let current = workflow
            .complete_current_step(StepState::Approved, Some(person("ro")), None, &ctx)
            .unwrap();
        assert_eq!(current.id, PROVISIONING_STEP);
        assert_eq!(workflow.step(APPROVAL_STEP).unwrap().state, StepState::Skipped);
    }

    #[test]
    fn test_normal_keeps_approval_with_changes() {
        let req = request(AllocationKind::Normal).with_proposed_change("workload", json!(50));
        let ctx = SkipContext::from_request(&req);
        let mut workflow = WorkflowVariant::Normal
            .new_workflow(person("creator"), &ctx)
            .unwrap();

        let current = workflow
            .complete_current_step(StepState::Approved, Some(person("ro")), None, &ctx)
            .unwrap();
        assert_eq!(current.id, APPROVAL_STEP);
        assert_eq!(current.state, StepState::Pending);
    }

    #[test]
    fn test_location_only_change_skips_when_unset_before() {
        let req = request(AllocationKind::JointVenture)
            .with_proposed_change(LOCATION_CHANGE_KEY, json!({ "id": Uuid::new_v4() }));
        assert!(NoApprovalNeeded.should_skip(&SkipContext::from_request(&req)));

        let mut moved = req.clone();
        moved.previous_location_id = Some(Uuid::new_v4());
        assert!(!NoApprovalNeeded.should_skip(&SkipContext::from_request(&moved)));
    }

    #[test]
    fn test_contractor_personnel_has_no_skips() {
        let workflow = WorkflowVariant::ContractorPersonnel
            .new_workflow(person("creator"), &SkipContext::empty())
            .unwrap();
        assert_eq!(workflow.current().id, CONTRACTOR_APPROVAL_STEP);
        assert!(!workflow.has_skip_condition(CONTRACTOR_APPROVAL_STEP));
        assert!(!workflow.has_skip_condition(COMPANY_APPROVAL_STEP));
    }

    #[test]
    fn test_persist_and_restore() {
        let req = request(AllocationKind::Normal);
        let workflow = WorkflowVariant::Normal
            .new_workflow(person("creator"), &SkipContext::from_request(&req))
            .unwrap();
        let persisted = WorkflowVariant::Normal.persist(&workflow);
        assert_eq!(persisted.current_step_id, PROPOSAL_STEP);

        let restored = WorkflowVariant::restore(&persisted).unwrap();
        assert_eq!(restored.current().id, PROPOSAL_STEP);
        assert_eq!(states(&restored), states(&workflow));
    }

    #[test]
    fn test_restore_rejects_stale_version() {
        let workflow = WorkflowVariant::Normal.definition();
        let mut persisted = WorkflowVariant::Normal.persist(&workflow);
        persisted.version = 0;
        assert!(matches!(
            WorkflowVariant::restore(&persisted),
            Err(ReqflowError::InvalidWorkflow(_))
        ));
    }

    #[test]
    fn test_from_str() {
        for variant in WorkflowVariant::ALL {
            assert_eq!(variant.id().parse::<WorkflowVariant>().unwrap(), variant);
        }
        assert!("allocation-enterprise".parse::<WorkflowVariant>().is_err());
    }
}
