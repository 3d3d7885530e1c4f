//! Request lifecycle events.
//!
//! This module provides [`LifecycleEvent`] for observing request lifecycle
//! transitions. The orchestrator publishes events through an
//! [`EventPublisher`] only after the corresponding state has been saved.
//! [`BroadcastPublisher`] fans them out over a `tokio` broadcast channel
//! that notification senders can subscribe to.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{Person, WorkflowVariant};

/// Default channel capacity for lifecycle events.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// An event emitted after a request lifecycle transition was saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// A draft request was initialized and its workflow started.
    RequestInitialized {
        /// The request's identifier.
        request_id: Uuid,
        /// The workflow variant that was attached.
        variant: WorkflowVariant,
    },

    /// The request's workflow was attached or replaced.
    WorkflowChanged {
        /// The request's identifier.
        request_id: Uuid,
        /// The step the request sits on afterwards.
        current_step_id: String,
    },

    /// Routing assigned a department to the request.
    DepartmentAssigned {
        /// The request's identifier.
        request_id: Uuid,
        /// The assigned department.
        department: String,
    },

    /// The request moved between workflow steps.
    RequestStateChanged {
        /// The request's identifier.
        request_id: Uuid,
        /// The step that was completed.
        previous_step_id: String,
        /// The step that is current afterwards.
        new_step_id: String,
    },

    /// The proposal was accepted on the task owner's behalf.
    ProposedPersonAutoAccepted {
        /// The request's identifier.
        request_id: Uuid,
        /// The accepted person, if one was proposed.
        person: Option<Person>,
    },

    /// The request reached its terminal step and awaits provisioning.
    ProvisioningRequested {
        /// The request's identifier.
        request_id: Uuid,
    },

    /// The request was provisioned and its lifecycle is complete.
    RequestProvisioned {
        /// The request's identifier.
        request_id: Uuid,
    },

    /// The request was rejected.
    RequestRejected {
        /// The request's identifier.
        request_id: Uuid,
        /// The step at which it was rejected.
        step_id: String,
        /// The rejection reason.
        reason: String,
    },
}

/// Fieldless discriminant of [`LifecycleEvent`], used as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EventKind {
    /// [`LifecycleEvent::RequestInitialized`].
    RequestInitialized,
    /// [`LifecycleEvent::WorkflowChanged`].
    WorkflowChanged,
    /// [`LifecycleEvent::DepartmentAssigned`].
    DepartmentAssigned,
    /// [`LifecycleEvent::RequestStateChanged`].
    RequestStateChanged,
    /// [`LifecycleEvent::ProposedPersonAutoAccepted`].
    ProposedPersonAutoAccepted,
    /// [`LifecycleEvent::ProvisioningRequested`].
    ProvisioningRequested,
    /// [`LifecycleEvent::RequestProvisioned`].
    RequestProvisioned,
    /// [`LifecycleEvent::RequestRejected`].
    RequestRejected,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [Self; 8] = [
        Self::RequestInitialized,
        Self::WorkflowChanged,
        Self::DepartmentAssigned,
        Self::RequestStateChanged,
        Self::ProposedPersonAutoAccepted,
        Self::ProvisioningRequested,
        Self::RequestProvisioned,
        Self::RequestRejected,
    ];
}

impl LifecycleEvent {
    /// Returns the request ID for this event.
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::RequestInitialized { request_id, .. }
            | Self::WorkflowChanged { request_id, .. }
            | Self::DepartmentAssigned { request_id, .. }
            | Self::RequestStateChanged { request_id, .. }
            | Self::ProposedPersonAutoAccepted { request_id, .. }
            | Self::ProvisioningRequested { request_id }
            | Self::RequestProvisioned { request_id }
            | Self::RequestRejected { request_id, .. } => *request_id,
        }
    }

    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestInitialized { .. } => EventKind::RequestInitialized,
            Self::WorkflowChanged { .. } => EventKind::WorkflowChanged,
            Self::DepartmentAssigned { .. } => EventKind::DepartmentAssigned,
            Self::RequestStateChanged { .. } => EventKind::RequestStateChanged,
            Self::ProposedPersonAutoAccepted { .. } => EventKind::ProposedPersonAutoAccepted,
            Self::ProvisioningRequested { .. } => EventKind::ProvisioningRequested,
            Self::RequestProvisioned { .. } => EventKind::RequestProvisioned,
            Self::RequestRejected { .. } => EventKind::RequestRejected,
        }
    }

    /// Returns true if the event ends the request's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RequestProvisioned { .. } | Self::RequestRejected { .. }
        )
    }
}

/// Receives lifecycle events from the orchestrator.
///
/// Publishing is fire-and-forget: it cannot fail and must not block.
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    fn publish(&self, event: LifecycleEvent);
}

/// An [`EventPublisher`] backed by a `tokio` broadcast channel.
///
/// Events are not persisted; if a receiver is too slow, events may be
/// dropped for it.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    event_tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastPublisher {
    /// Creates a publisher with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Subscribes to lifecycle events.
    ///
    /// The receiver sees every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

impl EventPublisher for BroadcastPublisher {
    /// Ignores send errors (no subscribers).
    fn publish(&self, event: LifecycleEvent) {
        let _ = self.event_tx.send(event);
    }
}
