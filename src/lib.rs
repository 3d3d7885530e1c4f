//! # Reqflow
//!
//! A request lifecycle engine for personnel allocation: a step-chain
//! workflow state machine, plus a department router that decides which
//! organizational unit owns an unassigned request.
//!
//! A request is created as a draft, then driven through its workflow by a
//! small set of commands on [`RequestOrchestrator`]:
//!
//! - **initialize** attaches the workflow for the request's type, runs the
//!   skip chain once, and routes the request to a department if it has none
//! - **approve** completes the current step and advances, auto-skipping
//!   steps whose [`SkipCondition`] holds
//! - **reject** ends the request at its current step
//! - **provision** completes the terminal step
//!
//! Every command persists through a [`RequestStore`] with optimistic
//! concurrency and only then publishes [`LifecycleEvent`]s.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use reqflow::*;
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let org = Arc::new(InMemoryOrgChart::new());
//! let router = RequestRouter::new(Arc::new(store.clone()), org.clone(), org);
//! let publisher = BroadcastPublisher::default();
//! let mut events = publisher.subscribe();
//!
//! let orchestrator = RequestOrchestrator::new(Arc::new(store.clone()), router, Arc::new(publisher));
//!
//! let request = Request::new(RequestType::Allocation(AllocationKind::Normal), project_id, creator);
//! store.insert(&request).await?;
//!
//! orchestrator.initialize(request.id).await?;
//! orchestrator.approve(request.id, resource_owner).await?;
//! println!("{}", orchestrator.status(request.id).await?);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod notification;
pub mod request;
pub mod routing;
pub mod status;
pub mod step;
pub mod store;
pub mod variant;
pub mod workflow;

pub use config::{LogFormat, LoggingConfig, ReqflowConfig, StoreBackend, StoreConfig};
pub use error::{ReqflowError, Result};
pub use event::{BroadcastPublisher, EventKind, EventPublisher, LifecycleEvent};
pub use lifecycle::{ApprovalValidator, CanApproveStep, RequestOrchestrator};
pub use logging::init_logging;
pub use notification::{Recipient, RecipientRole, RecipientTable};
pub use request::{
    AccountClassification, AllocationKind, PersistedWorkflow, ProposedPerson, Request,
    RequestState, RequestType,
};
pub use routing::{
    Department, DepartmentLookup, InMemoryOrgChart, Position, PositionResolver, RequestRouter,
    RoutingDecision, RoutingRule, RoutingSource,
};
pub use status::{StepStatusEntry, WorkflowStatus};
pub use step::{Person, StepState, WorkflowStep};
pub use store::{MemoryStore, RequestStore, RoutingRuleStore, StoreHandle};
pub use variant::WorkflowVariant;
pub use workflow::{skip_when, SkipCondition, SkipContext, WorkflowBuilder, WorkflowDefinition};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
