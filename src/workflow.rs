//! Workflow definition and step-chain management.
//!
//! This module provides [`WorkflowDefinition`] and [`WorkflowBuilder`] for
//! constructing and advancing a request's approval pipeline. A definition
//! is a chain of [`WorkflowStep`]s linked by `previous_step_id` /
//! `next_step_id`, validated as a graph with petgraph at build time and
//! again whenever persisted rows are restored onto it.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::request::{ProposedPerson, Request};
use crate::{Person, ReqflowError, Result, StepState, WorkflowStep};

static NO_CHANGES: BTreeMap<String, JsonValue> = BTreeMap::new();

/// The request attributes a skip condition may inspect.
#[derive(Debug, Clone, Copy)]
pub struct SkipContext<'a> {
    /// Person proposed for the request, if any.
    pub proposed_person: Option<&'a ProposedPerson>,
    /// Proposed field changes, keyed by field name.
    pub proposed_changes: &'a BTreeMap<String, JsonValue>,
    /// Location in effect before the proposed changes.
    pub previous_location_id: Option<Uuid>,
}

impl<'a> SkipContext<'a> {
    /// Builds the context for a request.
    pub fn from_request(request: &'a Request) -> Self {
        Self {
            proposed_person: request.proposed_person.as_ref(),
            proposed_changes: &request.proposed_changes,
            previous_location_id: request.previous_location_id,
        }
    }
}

impl SkipContext<'static> {
    /// A context with nothing proposed.
    pub fn empty() -> Self {
        Self {
            proposed_person: None,
            proposed_changes: &NO_CHANGES,
            previous_location_id: None,
        }
    }
}

/// A predicate attached to a step that, when true on entry, auto-completes
/// the step as `Skipped`.
///
/// # Examples
///
/// ```
/// use reqflow::{SkipCondition, SkipContext};
///
/// #[derive(Debug)]
/// struct NothingProposed;
///
/// impl SkipCondition for NothingProposed {
///     fn should_skip(&self, ctx: &SkipContext<'_>) -> bool {
///         ctx.proposed_person.is_none()
///     }
///
///     fn reason(&self) -> &str {
///         "nobody proposed"
///     }
/// }
///
/// assert!(NothingProposed.should_skip(&SkipContext::empty()));
/// ```
pub trait SkipCondition: Debug + Send + Sync {
    /// Returns true if the step should be skipped for this context.
    fn should_skip(&self, ctx: &SkipContext<'_>) -> bool;

    /// Rationale recorded on the skipped step.
    fn reason(&self) -> &str;
}

/// A [`SkipCondition`] backed by a closure. Created with [`skip_when`].
pub struct SkipWhen<F> {
    reason: String,
    predicate: F,
}

impl<F> Debug for SkipWhen<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipWhen")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<F> SkipCondition for SkipWhen<F>
where
    F: Fn(&SkipContext<'_>) -> bool + Send + Sync,
{
    fn should_skip(&self, ctx: &SkipContext<'_>) -> bool {
        (self.predicate)(ctx)
    }

    fn reason(&self) -> &str {
        &self.reason
    }
}

/// Wraps a closure as a [`SkipCondition`].
pub fn skip_when<F>(reason: impl Into<String>, predicate: F) -> SkipWhen<F>
where
    F: Fn(&SkipContext<'_>) -> bool + Send + Sync,
{
    SkipWhen {
        reason: reason.into(),
        predicate,
    }
}

/// A step plus the skip condition attached to it by the variant.
#[derive(Debug, Clone)]
struct StepSlot {
    step: WorkflowStep,
    skip: Option<Arc<dyn SkipCondition>>,
}

/// An ordered, linked chain of workflow steps with a tracked current step.
///
/// The current step only moves through
/// [`complete_current_step`](Self::complete_current_step) (and
/// [`begin`](Self::begin), which completes the entry step).
///
/// # Example
///
/// ```
/// use reqflow::{Person, SkipContext, StepState, WorkflowDefinition};
/// # use uuid::Uuid;
///
/// let mut workflow = WorkflowDefinition::builder("review", 1)
///     .step("created", "Created")
///     .step("approval", "Approval")
///     .step("done", "Done")
///     .build();
///
/// let creator = Person::new(Uuid::new_v4(), "Creator");
/// workflow.begin(creator.clone(), &SkipContext::empty())?;
/// assert_eq!(workflow.current().id, "approval");
///
/// workflow.complete_current_step(StepState::Approved, Some(creator), None, &SkipContext::empty())?;
/// assert_eq!(workflow.current().id, "done");
/// # Ok::<(), reqflow::ReqflowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    version: u32,
    slots: Vec<StepSlot>,
    index: HashMap<String, usize>,
    current: usize,
    dirty: bool,
}

impl WorkflowDefinition {
    /// Creates a new workflow builder.
    pub fn builder(name: impl Into<String>, version: u32) -> WorkflowBuilder {
        WorkflowBuilder::new(name, version)
    }

    /// The workflow's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The workflow's version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the step with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::UnknownStep`] if the id is not in the graph.
    pub fn step(&self, id: &str) -> Result<&WorkflowStep> {
        self.index
            .get(id)
            .map(|&i| &self.slots[i].step)
            .ok_or_else(|| ReqflowError::UnknownStep(id.to_string()))
    }

    /// Returns the steps in chain order, entry first.
    pub fn steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.slots.iter().map(|slot| &slot.step)
    }

    /// Returns the number of steps.
    pub fn step_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the step at the tracked current position.
    pub fn current(&self) -> &WorkflowStep {
        &self.slots[self.current].step
    }

    /// Returns the entry step.
    pub fn entry(&self) -> &WorkflowStep {
        &self.slots[0].step
    }

    /// Returns the terminal step.
    pub fn terminal(&self) -> &WorkflowStep {
        &self.slots[self.slots.len() - 1].step
    }

    /// Returns the predecessor of a step; `None` for the entry step.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::UnknownStep`] if `id` is not in the graph.
    pub fn previous_step(&self, id: &str) -> Result<Option<&WorkflowStep>> {
        let step = self.step(id)?;
        step.previous_step_id
            .as_deref()
            .map(|prev| self.step(prev))
            .transpose()
    }

    /// Returns the successor of a step; `None` for the terminal step.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::UnknownStep`] if `id` is not in the graph.
    pub fn next_step(&self, id: &str) -> Result<Option<&WorkflowStep>> {
        let step = self.step(id)?;
        step.next_step_id
            .as_deref()
            .map(|next| self.step(next))
            .transpose()
    }

    /// Returns true if a skip condition is attached to the step.
    pub fn has_skip_condition(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.slots[i].skip.is_some())
    }

    /// Returns true once the workflow can make no further progress:
    /// the terminal step is approved, or some step was rejected.
    pub fn is_finished(&self) -> bool {
        let current = self.current();
        match current.state {
            StepState::Rejected => true,
            StepState::Approved => current.is_terminal(),
            StepState::Pending | StepState::Skipped => false,
        }
    }

    /// Starts a fresh workflow: the entry step is completed by `creator`,
    /// its successor is started, and the skip chain runs once.
    ///
    /// Returns the step that is current afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::InvalidWorkflowState`] if the workflow has
    /// already begun.
    pub fn begin(&mut self, creator: Person, ctx: &SkipContext<'_>) -> Result<&WorkflowStep> {
        if self.current != 0 {
            let step = self.current();
            return Err(ReqflowError::InvalidWorkflowState {
                step_id: step.id.clone(),
                state: step.state,
            });
        }
        self.slots[0].step.start();
        self.complete_current_step(StepState::Approved, Some(creator), None, ctx)
    }

    /// Completes the current step.
    ///
    /// - `Approved`: the successor (if any) is started and becomes current,
    ///   then each successor whose skip condition holds is marked `Skipped`
    ///   and the chain continues forward. The terminal step is never
    ///   skipped.
    /// - `Rejected`: every step after the current one is marked `Skipped`
    ///   and the current step stays put.
    ///
    /// Returns the step that is current afterwards.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::InvalidWorkflowState`] if the current step is not
    ///   `Pending`
    /// - [`ReqflowError::InvalidWorkflow`] if `result` is not `Approved` or
    ///   `Rejected`
    pub fn complete_current_step(
        &mut self,
        result: StepState,
        completed_by: Option<Person>,
        reason: Option<String>,
        ctx: &SkipContext<'_>,
    ) -> Result<&WorkflowStep> {
        let current = &self.slots[self.current].step;
        if current.state != StepState::Pending {
            return Err(ReqflowError::InvalidWorkflowState {
                step_id: current.id.clone(),
                state: current.state,
            });
        }
        if !matches!(result, StepState::Approved | StepState::Rejected) {
            return Err(ReqflowError::InvalidWorkflow(format!(
                "step '{}' can only be completed as approved or rejected, not {}",
                current.id, result
            )));
        }

        self.slots[self.current]
            .step
            .complete(result, completed_by, reason);
        self.dirty = true;

        match result {
            StepState::Approved => self.advance(ctx),
            _ => self.skip_remaining(),
        }

        Ok(self.current())
    }

    /// Moves forward from the current step, applying skip conditions.
    fn advance(&mut self, ctx: &SkipContext<'_>) {
        while let Some(next) = self.successor_index(self.current) {
            self.current = next;
            let slot = &mut self.slots[next];
            slot.step.start();

            if slot.step.is_terminal() {
                break;
            }
            match &slot.skip {
                Some(condition) if condition.should_skip(ctx) => {
                    debug!(step = %slot.step.id, reason = condition.reason(), "skipping step");
                    slot.step.skip(Some(condition.reason().to_string()));
                }
                _ => break,
            }
        }
    }

    /// Marks every step after the current one as skipped.
    fn skip_remaining(&mut self) {
        let mut cursor = self.current;
        while let Some(next) = self.successor_index(cursor) {
            self.slots[next].step.skip(None);
            cursor = next;
        }
    }

    fn successor_index(&self, from: usize) -> Option<usize> {
        self.slots[from]
            .step
            .next_step_id
            .as_deref()
            .and_then(|id| self.index.get(id).copied())
    }

    /// Commit point for callers that have persisted the current step states.
    ///
    /// Returns true if there were changes since the last call.
    pub fn save_changes(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Returns true if steps changed since the last
    /// [`save_changes`](Self::save_changes).
    pub fn has_changes(&self) -> bool {
        self.dirty
    }

    /// Overlays persisted step rows onto this (freshly built) definition
    /// and positions the current step.
    ///
    /// # Errors
    ///
    /// - [`ReqflowError::UnknownStep`] if a row or `current_step_id` does not
    ///   belong to this workflow
    /// - [`ReqflowError::InvalidWorkflow`] if the rows are missing steps, are
    ///   linked differently, or do not form a valid chain
    pub fn restore(&mut self, current_step_id: &str, rows: &[WorkflowStep]) -> Result<()> {
        if rows.len() != self.slots.len() {
            return Err(ReqflowError::InvalidWorkflow(format!(
                "workflow '{}' has {} steps but {} rows were persisted",
                self.name,
                self.slots.len(),
                rows.len()
            )));
        }
        validate_chain(rows)?;

        for row in rows {
            let i = *self
                .index
                .get(&row.id)
                .ok_or_else(|| ReqflowError::UnknownStep(row.id.clone()))?;
            let template = &self.slots[i].step;
            if template.previous_step_id != row.previous_step_id
                || template.next_step_id != row.next_step_id
            {
                return Err(ReqflowError::InvalidWorkflow(format!(
                    "persisted step '{}' is linked differently from workflow '{}'",
                    row.id, self.name
                )));
            }
        }

        let current = *self
            .index
            .get(current_step_id)
            .ok_or_else(|| ReqflowError::UnknownStep(current_step_id.to_string()))?;

        for row in rows {
            let i = self.index[&row.id];
            self.slots[i].step = row.clone();
        }
        self.current = current;
        self.dirty = false;
        Ok(())
    }
}

/// Checks the chain invariants: unique ids, one entry, one terminal, no
/// self-links, consistent back-links, acyclic, all steps reachable.
fn validate_chain(steps: &[WorkflowStep]) -> Result<()> {
    let invalid = |msg: String| Err(ReqflowError::InvalidWorkflow(msg));

    if steps.is_empty() {
        return invalid("workflow has no steps".to_string());
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    let mut by_id: HashMap<&str, &WorkflowStep> = HashMap::new();
    for step in steps {
        if nodes.insert(&step.id, graph.add_node(&step.id)).is_some() {
            return invalid(format!("duplicate step id '{}'", step.id));
        }
        by_id.insert(&step.id, step);
    }

    for step in steps {
        let id = step.id.as_str();
        if step.previous_step_id.as_deref() == Some(id) || step.next_step_id.as_deref() == Some(id)
        {
            return invalid(format!("step '{id}' references itself"));
        }
        if let Some(next) = step.next_step_id.as_deref() {
            let Some(successor) = by_id.get(next) else {
                return Err(ReqflowError::UnknownStep(next.to_string()));
            };
            if successor.previous_step_id.as_deref() != Some(id) {
                return invalid(format!("step '{next}' does not link back to '{id}'"));
            }
            graph.add_edge(nodes[id], nodes[next], ());
        }
        if let Some(prev) = step.previous_step_id.as_deref() {
            let Some(predecessor) = by_id.get(prev) else {
                return Err(ReqflowError::UnknownStep(prev.to_string()));
            };
            if predecessor.next_step_id.as_deref() != Some(id) {
                return invalid(format!("step '{prev}' does not link forward to '{id}'"));
            }
        }
    }

    let entries: Vec<&WorkflowStep> = steps.iter().filter(|s| s.is_entry()).collect();
    let terminals = steps.iter().filter(|s| s.is_terminal()).count();
    if entries.len() != 1 {
        return invalid(format!("expected one entry step, found {}", entries.len()));
    }
    if terminals != 1 {
        return invalid(format!("expected one terminal step, found {terminals}"));
    }
    if petgraph::algo::is_cyclic_directed(&graph) {
        return invalid("step chain contains a cycle".to_string());
    }

    let mut dfs = Dfs::new(&graph, nodes[entries[0].id.as_str()]);
    let mut reachable = 0;
    while dfs.next(&graph).is_some() {
        reachable += 1;
    }
    if reachable != steps.len() {
        return invalid(format!(
            "{} of {} steps are unreachable from the entry step",
            steps.len() - reachable,
            steps.len()
        ));
    }

    Ok(())
}

/// Builder for constructing [`WorkflowDefinition`] instances.
///
/// Steps are linked in the order they are added. A skip condition applies
/// to the most recently added step.
pub struct WorkflowBuilder {
    name: String,
    version: u32,
    slots: Vec<StepSlot>,
}

impl WorkflowBuilder {
    fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            slots: Vec::new(),
        }
    }

    /// Appends a step to the chain.
    ///
    /// # Panics
    ///
    /// Panics if a step with the same id already exists.
    pub fn step(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        if self.slots.iter().any(|s| s.step.id == id) {
            panic!("duplicate step id: {}", id);
        }
        self.slots.push(StepSlot {
            step: WorkflowStep::new(id, name),
            skip: None,
        });
        self
    }

    /// Attaches a skip condition to the most recently added step.
    ///
    /// # Panics
    ///
    /// Panics if no step has been added yet.
    pub fn skip_if(mut self, condition: impl SkipCondition + 'static) -> Self {
        let Some(last) = self.slots.last_mut() else {
            panic!("skip_if called before any step was added");
        };
        last.skip = Some(Arc::new(condition));
        self
    }

    /// Builds the workflow, validating the chain.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::InvalidWorkflow`] if the workflow is empty or
    /// a skip condition is attached to the entry or terminal step (where it
    /// would never be evaluated).
    pub fn try_build(mut self) -> Result<WorkflowDefinition> {
        let ids: Vec<String> = self.slots.iter().map(|s| s.step.id.clone()).collect();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.step.previous_step_id = i.checked_sub(1).map(|p| ids[p].clone());
            slot.step.next_step_id = ids.get(i + 1).cloned();
        }

        let steps: Vec<WorkflowStep> = self.slots.iter().map(|s| s.step.clone()).collect();
        validate_chain(&steps)?;

        for slot in &self.slots {
            if slot.skip.is_some() && (slot.step.is_entry() || slot.step.is_terminal()) {
                return Err(ReqflowError::InvalidWorkflow(format!(
                    "skip condition on step '{}' would never be evaluated",
                    slot.step.id
                )));
            }
        }

        let index = ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        Ok(WorkflowDefinition {
            name: self.name,
            version: self.version,
            slots: self.slots,
            index,
            current: 0,
            dirty: false,
        })
    }

    /// Builds the workflow.
    ///
    /// # Panics
    ///
    /// Panics if the chain is malformed; see [`try_build`](Self::try_build).
    pub fn build(self) -> WorkflowDefinition {
        let name = self.name.clone();
        match self.try_build() {
            Ok(workflow) => workflow,
            Err(e) => panic!("malformed workflow '{}': {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{AccountClassification, AllocationKind, RequestType};

    fn person(name: &str) -> Person {
        Person::new(Uuid::new_v4(), name)
    }

    fn always(reason: &'static str) -> impl SkipCondition {
        skip_when(reason, |_: &SkipContext<'_>| true)
    }

    fn linear(ids: &[&str]) -> WorkflowDefinition {
        ids.iter()
            .fold(WorkflowDefinition::builder("test", 1), |b, id| b.step(*id, *id))
            .build()
    }

    #[test]
    fn test_builder_links_steps_in_order() {
        let workflow = linear(&["a", "b", "c"]);
        assert_eq!(workflow.step_count(), 3);
        assert!(workflow.step("a").unwrap().is_entry());
        assert_eq!(workflow.step("a").unwrap().next_step_id.as_deref(), Some("b"));
        assert_eq!(workflow.step("b").unwrap().previous_step_id.as_deref(), Some("a"));
        assert!(workflow.step("c").unwrap().is_terminal());
        assert_eq!(workflow.current().id, "a");
    }

    #[test]
    #[should_panic(expected = "duplicate step id")]
    fn test_duplicate_step_panics() {
        let _ = WorkflowDefinition::builder("dup", 1)
            .step("a", "A")
            .step("a", "A again");
    }

    #[test]
    fn test_empty_workflow_is_invalid() {
        let result = WorkflowDefinition::builder("empty", 1).try_build();
        assert!(matches!(result, Err(ReqflowError::InvalidWorkflow(_))));
    }

    #[test]
    #[should_panic(expected = "malformed workflow 'empty'")]
    fn test_build_panics_on_malformed_workflow() {
        let _ = WorkflowDefinition::builder("empty", 1).build();
    }

    #[test]
    fn test_skip_condition_on_terminal_is_rejected() {
        let result = WorkflowDefinition::builder("bad", 1)
            .step("a", "A")
            .step("b", "B")
            .skip_if(always("never evaluated"))
            .try_build();
        assert!(matches!(result, Err(ReqflowError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_unknown_step_lookup() {
        let workflow = linear(&["a", "b"]);
        assert!(matches!(
            workflow.step("zzz"),
            Err(ReqflowError::UnknownStep(id)) if id == "zzz"
        ));
    }

    #[test]
    fn test_previous_of_entry_is_none() {
        let workflow = linear(&["a", "b"]);
        assert!(workflow.previous_step("a").unwrap().is_none());
        assert_eq!(workflow.previous_step("b").unwrap().unwrap().id, "a");
        assert!(workflow.next_step("b").unwrap().is_none());
    }

    #[test]
    fn test_begin_completes_entry_and_starts_successor() {
        let creator = person("Creator");
        let mut workflow = linear(&["created", "approval", "provisioning"]);
        let current = workflow.begin(creator.clone(), &SkipContext::empty()).unwrap();
        assert_eq!(current.id, "approval");

        let entry = workflow.step("created").unwrap();
        assert_eq!(entry.state, StepState::Approved);
        assert_eq!(entry.completed_by, Some(creator));

        let approval = workflow.step("approval").unwrap();
        assert_eq!(approval.state, StepState::Pending);
        assert!(approval.is_started());
        assert!(!workflow.step("provisioning").unwrap().is_started());
        assert!(workflow.has_changes());
    }

    #[test]
    fn test_begin_twice_is_invalid_state() {
        let mut workflow = linear(&["a", "b"]);
        workflow.begin(person("c"), &SkipContext::empty()).unwrap();
        let result = workflow.begin(person("c"), &SkipContext::empty());
        assert!(matches!(result, Err(ReqflowError::InvalidWorkflowState { .. })));
    }

    #[test]
    fn test_approve_chain_skips_successor() {
        let mut workflow = WorkflowDefinition::builder("chain", 1)
            .step("a", "A")
            .step("b", "B")
            .step("c", "C")
            .skip_if(always("not needed"))
            .step("d", "D")
            .build();
        let ctx = SkipContext::empty();
        workflow.begin(person("creator"), &ctx).unwrap();

        let current = workflow
            .complete_current_step(StepState::Approved, Some(person("editor")), None, &ctx)
            .unwrap();
        assert_eq!(current.id, "d");
        assert_eq!(current.state, StepState::Pending);

        let skipped = workflow.step("c").unwrap();
        assert_eq!(skipped.state, StepState::Skipped);
        assert!(skipped.completed_by.is_none());
        assert_eq!(skipped.reason.as_deref(), Some("not needed"));
    }

    #[test]
    fn test_consecutive_skips_continue_forward() {
        let mut workflow = WorkflowDefinition::builder("chain", 1)
            .step("a", "A")
            .step("b", "B")
            .skip_if(always("one"))
            .step("c", "C")
            .skip_if(always("two"))
            .step("d", "D")
            .build();
        let current = workflow
            .begin(person("creator"), &SkipContext::empty())
            .unwrap();
        assert_eq!(current.id, "d");
        assert_eq!(workflow.step("b").unwrap().state, StepState::Skipped);
        assert_eq!(workflow.step("c").unwrap().state, StepState::Skipped);
    }

    #[test]
    fn test_skip_condition_that_does_not_hold_stops_chain() {
        let mut workflow = WorkflowDefinition::builder("chain", 1)
            .step("a", "A")
            .step("b", "B")
            .skip_if(skip_when("no person", |ctx: &SkipContext<'_>| {
                ctx.proposed_person.is_none()
            }))
            .step("c", "C")
            .build();

        let request = Request::new(
            RequestType::Allocation(AllocationKind::Normal),
            Uuid::new_v4(),
            person("creator"),
        )
        .with_proposed_person(person("Ola"), AccountClassification::Employee);

        let current = workflow
            .begin(person("creator"), &SkipContext::from_request(&request))
            .unwrap();
        assert_eq!(current.id, "b");
        assert_eq!(current.state, StepState::Pending);
    }

    #[test]
    fn test_reject_skips_all_following_steps() {
        let mut workflow = linear(&["a", "b", "c", "d"]);
        let ctx = SkipContext::empty();
        workflow.begin(person("creator"), &ctx).unwrap();

        let current = workflow
            .complete_current_step(
                StepState::Rejected,
                Some(person("editor")),
                Some("no budget".to_string()),
                &ctx,
            )
            .unwrap();
        assert_eq!(current.id, "b");
        assert_eq!(current.state, StepState::Rejected);
        assert_eq!(current.reason.as_deref(), Some("no budget"));
        assert_eq!(workflow.step("c").unwrap().state, StepState::Skipped);
        assert_eq!(workflow.step("d").unwrap().state, StepState::Skipped);
        assert!(workflow.is_finished());
    }

    #[test]
    fn test_completing_non_pending_step_fails() {
        let mut workflow = linear(&["a", "b"]);
        let ctx = SkipContext::empty();
        workflow.begin(person("creator"), &ctx).unwrap();
        workflow
            .complete_current_step(StepState::Approved, None, None, &ctx)
            .unwrap();
        assert!(workflow.is_finished());

        let result = workflow.complete_current_step(StepState::Approved, None, None, &ctx);
        assert!(matches!(
            result,
            Err(ReqflowError::InvalidWorkflowState { step_id, state: StepState::Approved }) if step_id == "b"
        ));
    }

    #[test]
    fn test_complete_as_skipped_is_refused() {
        let mut workflow = linear(&["a", "b", "c"]);
        let ctx = SkipContext::empty();
        workflow.begin(person("creator"), &ctx).unwrap();
        let result = workflow.complete_current_step(StepState::Skipped, None, None, &ctx);
        assert!(matches!(result, Err(ReqflowError::InvalidWorkflow(_))));
        assert_eq!(workflow.current().state, StepState::Pending);
    }

    #[test]
    fn test_save_changes_resets_dirty_flag() {
        let mut workflow = linear(&["a", "b"]);
        assert!(!workflow.save_changes());
        workflow.begin(person("creator"), &SkipContext::empty()).unwrap();
        assert!(workflow.save_changes());
        assert!(!workflow.has_changes());
    }

    #[test]
    fn test_restore_overlays_rows() {
        let ctx = SkipContext::empty();
        let mut original = linear(&["a", "b", "c"]);
        original.begin(person("creator"), &ctx).unwrap();
        original
            .complete_current_step(StepState::Approved, None, None, &ctx)
            .unwrap();
        let rows: Vec<WorkflowStep> = original.steps().cloned().collect();

        let mut restored = linear(&["a", "b", "c"]);
        restored.restore("c", &rows).unwrap();
        assert_eq!(restored.current().id, "c");
        assert_eq!(restored.step("b").unwrap().state, StepState::Approved);
        assert!(!restored.has_changes());
    }

    #[test]
    fn test_restore_rejects_foreign_rows() {
        let other = linear(&["x", "y", "z"]);
        let rows: Vec<WorkflowStep> = other.steps().cloned().collect();
        let mut workflow = linear(&["a", "b", "c"]);
        assert!(matches!(
            workflow.restore("a", &rows),
            Err(ReqflowError::UnknownStep(_))
        ));
    }

    #[test]
    fn test_restore_rejects_unknown_current() {
        let workflow = linear(&["a", "b"]);
        let rows: Vec<WorkflowStep> = workflow.steps().cloned().collect();
        let mut target = linear(&["a", "b"]);
        assert!(matches!(
            target.restore("nope", &rows),
            Err(ReqflowError::UnknownStep(_))
        ));
    }

    #[test]
    fn test_validate_chain_detects_cycle_and_self_link() {
        let mut a = WorkflowStep::new("a", "A");
        let mut b = WorkflowStep::new("b", "B");
        a.next_step_id = Some("b".to_string());
        a.previous_step_id = Some("b".to_string());
        b.next_step_id = Some("a".to_string());
        b.previous_step_id = Some("a".to_string());
        assert!(matches!(
            validate_chain(&[a, b]),
            Err(ReqflowError::InvalidWorkflow(_))
        ));

        let mut selfish = WorkflowStep::new("s", "S");
        selfish.next_step_id = Some("s".to_string());
        assert!(matches!(
            validate_chain(&[selfish]),
            Err(ReqflowError::InvalidWorkflow(msg)) if msg.contains("itself")
        ));
    }

    #[test]
    fn test_validate_chain_detects_broken_back_link() {
        let mut a = WorkflowStep::new("a", "A");
        let b = WorkflowStep::new("b", "B");
        a.next_step_id = Some("b".to_string());
        assert!(matches!(
            validate_chain(&[a, b]),
            Err(ReqflowError::InvalidWorkflow(msg)) if msg.contains("link back")
        ));
    }
}
