//! Notification recipient selection.
//!
//! The engine does not format or deliver notifications. It only decides
//! who should hear about each [`LifecycleEvent`], via a [`RecipientTable`]
//! keyed on [`EventKind`] that is built once and then only read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{EventKind, LifecycleEvent, Person, Request};

/// A party that can be notified about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecipientRole {
    /// Whoever created the request.
    Creator,
    /// The department that owns the request.
    AssignedDepartment,
    /// The person proposed to fill the request.
    ProposedPerson,
    /// Task owner of the request's org-chart position.
    TaskOwner,
}

/// A concrete notification target, resolved from a role and a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// A single person.
    Person(Person),
    /// Everyone in a department.
    Department(String),
    /// The task owner of an org-chart position, resolved by the sender.
    TaskOwnerOf(Uuid),
}

/// Maps event kinds to the roles that should be notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientTable {
    entries: BTreeMap<EventKind, Vec<RecipientRole>>,
}

impl Default for RecipientTable {
    fn default() -> Self {
        use RecipientRole::*;

        Self::new([
            (EventKind::RequestInitialized, vec![AssignedDepartment]),
            (EventKind::WorkflowChanged, vec![]),
            (EventKind::DepartmentAssigned, vec![AssignedDepartment]),
            (EventKind::RequestStateChanged, vec![Creator, AssignedDepartment]),
            (EventKind::ProposedPersonAutoAccepted, vec![TaskOwner, ProposedPerson]),
            (EventKind::ProvisioningRequested, vec![AssignedDepartment]),
            (EventKind::RequestProvisioned, vec![Creator, ProposedPerson, TaskOwner]),
            (EventKind::RequestRejected, vec![Creator, AssignedDepartment]),
        ])
    }
}

impl RecipientTable {
    /// Builds a table from `(kind, roles)` pairs. Kinds not listed have no
    /// recipients; a kind listed twice keeps its last entry.
    pub fn new(entries: impl IntoIterator<Item = (EventKind, Vec<RecipientRole>)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Returns the roles to notify for an event kind.
    pub fn roles(&self, kind: EventKind) -> &[RecipientRole] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the roles to notify for an event.
    pub fn recipients_for(&self, event: &LifecycleEvent) -> &[RecipientRole] {
        self.roles(event.kind())
    }

    /// Resolves an event's roles against the request it concerns.
    ///
    /// Roles the request cannot fill (no department yet, nobody proposed,
    /// no position) are dropped. Duplicates are removed.
    pub fn resolve(&self, event: &LifecycleEvent, request: &Request) -> Vec<Recipient> {
        let mut resolved = Vec::new();
        for role in self.recipients_for(event) {
            let recipient = match role {
                RecipientRole::Creator => Some(Recipient::Person(request.created_by.clone())),
                RecipientRole::AssignedDepartment => request
                    .assigned_department
                    .clone()
                    .map(Recipient::Department),
                RecipientRole::ProposedPerson => request
                    .proposed_person
                    .as_ref()
                    .map(|p| Recipient::Person(p.person.clone())),
                RecipientRole::TaskOwner => request.position_id.map(Recipient::TaskOwnerOf),
            };
            if let Some(recipient) = recipient {
                if !resolved.contains(&recipient) {
                    resolved.push(recipient);
                }
            }
        }
        resolved
    }
}
