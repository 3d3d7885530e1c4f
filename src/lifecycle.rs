//! Request lifecycle orchestration.
//!
//! [`RequestOrchestrator`] owns the commands that move a request through
//! its lifecycle:
//!
//! ```text
//! Draft --initialize--> Active --approve*--> (terminal pending) --provision--> Completed
//!                          \
//!                           +--reject--> Rejected
//! ```
//!
//! Every command loads the request, rebuilds its workflow from the stored
//! rows, applies one transition, saves, and only then publishes events.
//! The save and the publishing run together on a spawned task, so dropping
//! a command mid-save cannot leave a committed transition without its
//! events.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::status::WorkflowStatus;
use crate::variant::APPROVAL_STEP;
use crate::{
    EventPublisher, LifecycleEvent, Person, ReqflowError, Request, RequestRouter, RequestState,
    RequestStore, RequestType, Result, SkipContext, StepState, WorkflowDefinition, WorkflowStep,
    WorkflowVariant,
};

/// The pre-check raised before a step is approved.
#[derive(Debug, Clone, Copy)]
pub struct CanApproveStep<'a> {
    /// The request being approved.
    pub request: &'a Request,
    /// The step that would be completed.
    pub step: &'a WorkflowStep,
    /// Who is approving.
    pub editor: &'a Person,
}

impl CanApproveStep<'_> {
    /// Builds the error a validator returns to veto this approval.
    pub fn veto(&self, reason: impl Into<String>) -> ReqflowError {
        ReqflowError::ValidationVeto {
            request_id: self.request.id,
            step_id: self.step.id.clone(),
            reason: reason.into(),
        }
    }
}

/// An external check that may veto an approval.
///
/// Validators run in registration order before anything is changed. The
/// first error aborts the approval and is returned to the caller as is.
#[async_trait]
pub trait ApprovalValidator: Send + Sync {
    /// Returns `Ok(())` to allow the approval.
    ///
    /// # Errors
    ///
    /// Any error vetoes the approval, typically built with
    /// [`CanApproveStep::veto`].
    async fn can_approve_step(&self, check: &CanApproveStep<'_>) -> Result<()>;
}

/// Runs lifecycle commands against stored requests.
///
/// The orchestrator holds no per-request state. Concurrent commands on the
/// same request are resolved by the store's version check: the loser gets
/// [`ReqflowError::Conflict`] and nothing it did is kept.
#[derive(Clone)]
pub struct RequestOrchestrator {
    store: Arc<dyn RequestStore>,
    router: RequestRouter,
    publisher: Arc<dyn EventPublisher>,
    validators: Vec<Arc<dyn ApprovalValidator>>,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("router", &self.router)
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

impl RequestOrchestrator {
    /// Creates an orchestrator with no approval validators.
    pub fn new(
        store: Arc<dyn RequestStore>,
        router: RequestRouter,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            router,
            publisher,
            validators: Vec::new(),
        }
    }

    /// Registers an approval validator.
    pub fn with_validator(mut self, validator: Arc<dyn ApprovalValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Takes a draft request live: attaches and starts the workflow for
    /// its type and routes it to a department if none is assigned.
    ///
    /// Routing failures are logged and leave the request unassigned.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::InvalidOperation`] if the request is not a draft
    /// - [`ReqflowError::Conflict`] if the request changed concurrently
    pub async fn initialize(&self, request_id: Uuid) -> Result<Request> {
        let span = info_span!("initialize", request_id = %request_id);
        self.initialize_inner(request_id).instrument(span).await
    }

    async fn initialize_inner(&self, request_id: Uuid) -> Result<Request> {
        let mut request = self.store.load(request_id).await?;
        if !request.is_draft() {
            return Err(ReqflowError::invalid_operation(
                request_id,
                format!("request is {:?}, only drafts can be initialized", request.state),
            ));
        }

        let variant = WorkflowVariant::for_request_type(request.request_type);
        let mut workflow =
            variant.new_workflow(request.created_by.clone(), &SkipContext::from_request(&request))?;
        let assigned = match self.assign_department(&mut request).await {
            Ok(assigned) => assigned,
            Err(e) => {
                warn!(error = %e, "department routing failed, request left unassigned");
                None
            }
        };

        request.state = RequestState::Active;
        request.workflow = Some(variant.persist(&workflow));

        let current_step_id = workflow.current().id.clone();
        let mut events = vec![
            LifecycleEvent::RequestInitialized {
                request_id,
                variant,
            },
            LifecycleEvent::WorkflowChanged {
                request_id,
                current_step_id: current_step_id.clone(),
            },
        ];
        if let Some(department) = assigned {
            events.push(LifecycleEvent::DepartmentAssigned {
                request_id,
                department,
            });
        }

        let request = self.commit(request, events).await?;
        workflow.save_changes();
        info!(variant = %variant, current_step = %current_step_id, "request initialized");

        Ok(request)
    }

    /// Routes an unassigned request to a department.
    ///
    /// Returns the request's department afterwards. A request that already
    /// has a department is returned untouched without consulting the
    /// router, so repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::Integration`] if the org chart could not be
    ///   consulted; the request is left unchanged
    /// - [`ReqflowError::Conflict`] if the request changed concurrently
    pub async fn route(&self, request_id: Uuid) -> Result<Option<String>> {
        let span = info_span!("route", request_id = %request_id);
        self.route_inner(request_id).instrument(span).await
    }

    async fn route_inner(&self, request_id: Uuid) -> Result<Option<String>> {
        let mut request = self.store.load(request_id).await?;
        if request.assigned_department.is_some() {
            debug!("department already assigned");
            return Ok(request.assigned_department);
        }

        let Some(department) = self.assign_department(&mut request).await? else {
            return Ok(None);
        };
        let event = LifecycleEvent::DepartmentAssigned {
            request_id,
            department: department.clone(),
        };
        self.commit(request, vec![event]).await?;
        Ok(Some(department))
    }

    /// Assigns a department if the request has none. Returns the newly
    /// assigned department.
    async fn assign_department(&self, request: &mut Request) -> Result<Option<String>> {
        if request.assigned_department.is_some() {
            debug!("department already assigned, routing skipped");
            return Ok(None);
        }

        match self.router.route(request).await? {
            Some(decision) => {
                info!(
                    department = %decision.department,
                    source = ?decision.source,
                    responsible = ?decision.responsible.as_ref().map(|p| p.id),
                    "department assigned"
                );
                request.assigned_department = Some(decision.department.clone());
                Ok(Some(decision.department))
            }
            None => {
                info!("no routing rule matched, request left unassigned");
                Ok(None)
            }
        }
    }

    /// Saves the request, then publishes `events`, on a spawned task.
    ///
    /// Once this is entered the save and the publishing run to completion
    /// even if the calling command is dropped. A command dropped before
    /// reaching it persists nothing.
    async fn commit(&self, mut request: Request, events: Vec<LifecycleEvent>) -> Result<Request> {
        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);
        let tail = async move {
            request.version = store.save(&request).await?;
            for event in events {
                publisher.publish(event);
            }
            Ok::<Request, ReqflowError>(request)
        };

        tokio::spawn(tail.in_current_span())
            .await
            .map_err(|e| ReqflowError::Store(format!("commit task failed: {e}")))?
    }

    /// Approves the current step and advances the workflow, skipping any
    /// steps whose skip condition holds.
    ///
    /// The terminal step cannot be approved; use
    /// [`provision`](Self::provision).
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::InvalidOperation`] if the workflow is not
    ///   initialized or the request awaits provisioning
    /// - [`ReqflowError::InvalidWorkflowState`] if the current step is not
    ///   pending
    /// - any error returned by an [`ApprovalValidator`]
    /// - [`ReqflowError::Conflict`] if the request changed concurrently
    pub async fn approve(&self, request_id: Uuid, editor: Person) -> Result<Request> {
        let span = info_span!("approve", request_id = %request_id, editor = %editor.id);
        self.approve_inner(request_id, editor).instrument(span).await
    }

    async fn approve_inner(&self, request_id: Uuid, editor: Person) -> Result<Request> {
        let mut request = self.store.load(request_id).await?;
        let (variant, mut workflow) = restore_workflow(&request)?;

        {
            let current = workflow.current();
            ensure_pending(current)?;
            if current.is_terminal() {
                return Err(ReqflowError::invalid_operation(
                    request_id,
                    "request is awaiting provisioning",
                ));
            }

            let check = CanApproveStep {
                request: &request,
                step: current,
                editor: &editor,
            };
            for validator in &self.validators {
                validator.can_approve_step(&check).await?;
            }
        }

        let previous_step_id = workflow.current().id.clone();
        let new_step = workflow
            .complete_current_step(
                StepState::Approved,
                Some(editor),
                None,
                &SkipContext::from_request(&request),
            )?
            .clone();

        request.workflow = Some(variant.persist(&workflow));

        let mut events = vec![LifecycleEvent::RequestStateChanged {
            request_id,
            previous_step_id: previous_step_id.clone(),
            new_step_id: new_step.id.clone(),
        }];
        if new_step.id == APPROVAL_STEP {
            events.push(LifecycleEvent::ProposedPersonAutoAccepted {
                request_id,
                person: request.proposed_person.as_ref().map(|p| p.person.clone()),
            });
        }
        if new_step.is_terminal() {
            events.push(LifecycleEvent::ProvisioningRequested { request_id });
        }

        let request = self.commit(request, events).await?;
        workflow.save_changes();
        info!(from = %previous_step_id, to = %new_step.id, "step approved");

        Ok(request)
    }

    /// Rejects the request at its current step.
    ///
    /// Allocation requests can be rejected at any pending step before
    /// provisioning. Contractor-personnel requests can also be rejected
    /// while provisioning is pending.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::InvalidOperation`] if the workflow is not
    ///   initialized, the request is no longer active, or the request type
    ///   cannot be rejected at this step
    /// - [`ReqflowError::InvalidWorkflowState`] if the current step is not
    ///   pending
    /// - [`ReqflowError::Conflict`] if the request changed concurrently
    pub async fn reject(
        &self,
        request_id: Uuid,
        editor: Person,
        reason: impl Into<String>,
    ) -> Result<Request> {
        let span = info_span!("reject", request_id = %request_id, editor = %editor.id);
        self.reject_inner(request_id, editor, reason.into())
            .instrument(span)
            .await
    }

    async fn reject_inner(&self, request_id: Uuid, editor: Person, reason: String) -> Result<Request> {
        let mut request = self.store.load(request_id).await?;
        let (variant, mut workflow) = restore_workflow(&request)?;
        ensure_active(&request)?;

        let current = workflow.current();
        ensure_pending(current)?;
        let rejectable = match request.request_type {
            RequestType::Allocation(_) => !current.is_terminal(),
            RequestType::ContractorPersonnel => true,
        };
        if !rejectable {
            return Err(ReqflowError::invalid_operation(
                request_id,
                "allocation requests cannot be rejected once provisioning is pending",
            ));
        }

        let step_id = workflow
            .complete_current_step(
                StepState::Rejected,
                Some(editor),
                Some(reason.clone()),
                &SkipContext::from_request(&request),
            )?
            .id
            .clone();

        request.state = RequestState::Rejected;
        request.workflow = Some(variant.persist(&workflow));

        let event = LifecycleEvent::RequestRejected {
            request_id,
            step_id: step_id.clone(),
            reason: reason.clone(),
        };
        let request = self.commit(request, vec![event]).await?;
        workflow.save_changes();
        info!(step = %step_id, reason = %reason, "request rejected");

        Ok(request)
    }

    /// Marks a request that awaits provisioning as provisioned, completing
    /// its lifecycle.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::InvalidOperation`] if the workflow is not
    ///   initialized, the request is no longer active, or the request has
    ///   not reached its terminal step
    /// - [`ReqflowError::Conflict`] if the request changed concurrently
    pub async fn provision(&self, request_id: Uuid, editor: Person) -> Result<Request> {
        let span = info_span!("provision", request_id = %request_id, editor = %editor.id);
        self.provision_inner(request_id, editor).instrument(span).await
    }

    async fn provision_inner(&self, request_id: Uuid, editor: Person) -> Result<Request> {
        let mut request = self.store.load(request_id).await?;
        let (variant, mut workflow) = restore_workflow(&request)?;
        ensure_active(&request)?;

        let current = workflow.current();
        ensure_pending(current)?;
        if !current.is_terminal() {
            return Err(ReqflowError::invalid_operation(
                request_id,
                format!("request is at '{}', not awaiting provisioning", current.id),
            ));
        }

        workflow.complete_current_step(
            StepState::Approved,
            Some(editor),
            None,
            &SkipContext::from_request(&request),
        )?;

        if workflow.is_finished() {
            request.state = RequestState::Completed;
        }
        request.workflow = Some(variant.persist(&workflow));

        // Terminal step: no transition to report.
        let event = LifecycleEvent::RequestProvisioned { request_id };
        let request = self.commit(request, vec![event]).await?;
        workflow.save_changes();
        info!("request provisioned");

        Ok(request)
    }

    /// Returns a snapshot of the request's workflow.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::RequestNotFound`] if the request does not exist
    /// - [`ReqflowError::InvalidOperation`] if the workflow is not
    ///   initialized
    pub async fn status(&self, request_id: Uuid) -> Result<WorkflowStatus> {
        let request = self.store.load(request_id).await?;
        let workflow = request
            .workflow
            .as_ref()
            .ok_or_else(|| ReqflowError::invalid_operation(request_id, "workflow not initialized"))?;
        Ok(WorkflowStatus::new(request_id, request.state, workflow))
    }
}

fn restore_workflow(request: &Request) -> Result<(WorkflowVariant, WorkflowDefinition)> {
    let persisted = request
        .workflow
        .as_ref()
        .ok_or_else(|| ReqflowError::invalid_operation(request.id, "workflow not initialized"))?;
    Ok((persisted.variant, WorkflowVariant::restore(persisted)?))
}

fn ensure_active(request: &Request) -> Result<()> {
    if request.state != RequestState::Active {
        return Err(ReqflowError::invalid_operation(
            request.id,
            format!("request is {:?}", request.state),
        ));
    }
    Ok(())
}

fn ensure_pending(step: &WorkflowStep) -> Result<()> {
    if step.state != StepState::Pending {
        return Err(ReqflowError::InvalidWorkflowState {
            step_id: step.id.clone(),
            state: step.state,
        });
    }
    Ok(())
}
