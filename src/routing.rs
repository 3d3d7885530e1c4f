//! Department routing for unassigned requests.
//!
//! [`RequestRouter`] scores every [`RoutingRule`] in the responsibility
//! matrix against a request and the request's org-chart position, and
//! returns the department that should own the request.
//!
//! Selection runs in three tiers:
//!
//! 1. **Scored rules.** A rule is relevant only if none of its set
//!    attributes contradict the request. Relevant rules score
//!    [`PROJECT_WEIGHT`] for a project match, plus [`DISCIPLINE_WEIGHT`]
//!    for a discipline match, plus [`LOCATION_WEIGHT`] for a location
//!    match. The best rule scoring at least [`PRIMARY_THRESHOLD`] wins, so
//!    a project match is mandatory. Among equal scores a discipline match
//!    beats a location match, then rule order decides.
//! 2. **Base-position rules.** Rules whose only set attribute is the base
//!    position, matched against the position's base position.
//! 3. **Base-position department.** The department configured on the base
//!    position itself, resolved through [`DepartmentLookup`].
//!
//! A rule with no attributes set is relevant to everything but scores 0
//! and is not a base-position rule, so it never wins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::store::RoutingRuleStore;
use crate::{Person, ReqflowError, Request, Result};

/// Score contributed by a project match.
pub const PROJECT_WEIGHT: u8 = 5;
/// Score contributed by a discipline match.
pub const DISCIPLINE_WEIGHT: u8 = 2;
/// Score contributed by a location match.
pub const LOCATION_WEIGHT: u8 = 1;
/// Minimum score for the scored tier.
pub const PRIMARY_THRESHOLD: u8 = PROJECT_WEIGHT;

/// A responsibility-matrix row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Rule identifier.
    pub id: Uuid,
    /// Project the rule applies to.
    pub project_id: Option<Uuid>,
    /// Discipline the rule applies to. Must equal the request's discipline exactly.
    pub discipline: Option<String>,
    /// Location the rule applies to.
    pub location_id: Option<Uuid>,
    /// Base position the rule applies to.
    pub base_position_id: Option<Uuid>,
    /// Department that receives matching requests.
    pub department: String,
    /// Person responsible for the rule.
    pub responsible: Option<Person>,
}

impl RoutingRule {
    /// Creates a rule with no match attributes (a catch-all).
    pub fn new(department: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: None,
            discipline: None,
            location_id: None,
            base_position_id: None,
            department: department.into(),
            responsible: None,
        }
    }

    /// Restricts the rule to a project.
    pub fn for_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Restricts the rule to a discipline.
    pub fn for_discipline(mut self, discipline: impl Into<String>) -> Self {
        self.discipline = Some(discipline.into());
        self
    }

    /// Restricts the rule to a location.
    pub fn for_location(mut self, location_id: Uuid) -> Self {
        self.location_id = Some(location_id);
        self
    }

    /// Restricts the rule to a base position.
    pub fn for_base_position(mut self, base_position_id: Uuid) -> Self {
        self.base_position_id = Some(base_position_id);
        self
    }

    /// Sets the person responsible for requests routed by this rule.
    pub fn with_responsible(mut self, person: Person) -> Self {
        self.responsible = Some(person);
        self
    }

    /// Returns true if no match attribute is set.
    pub fn is_catch_all(&self) -> bool {
        self.project_id.is_none()
            && self.discipline.is_none()
            && self.location_id.is_none()
            && self.base_position_id.is_none()
    }

    /// Returns true if the base position is the only match attribute set.
    pub fn is_base_position_only(&self) -> bool {
        self.base_position_id.is_some()
            && self.project_id.is_none()
            && self.discipline.is_none()
            && self.location_id.is_none()
    }
}

/// An org-chart position as returned by [`PositionResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Base position the position is instantiated from.
    pub base_position_id: Uuid,
    /// Department configured on the base position.
    pub base_position_department: Option<String>,
}

/// A resolved department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Full department path, e.g. `PDP PRD FE MMS`.
    pub full_path: String,
}

/// Looks up positions in the external org chart.
#[async_trait]
pub trait PositionResolver: Send + Sync {
    /// Returns the position, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Integration`] if the org chart cannot be
    /// reached.
    async fn resolve_position(&self, position_id: Uuid) -> Result<Option<Position>>;
}

/// Resolves a department path or id to a department.
#[async_trait]
pub trait DepartmentLookup: Send + Sync {
    /// Returns the department, or `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Integration`] if the lookup service fails.
    async fn resolve(&self, department: &str) -> Result<Option<Department>>;
}

/// Which tier produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingSource {
    /// A scored rule.
    Rule {
        /// The winning rule.
        rule_id: Uuid,
        /// Its score.
        score: u8,
    },
    /// A base-position-only rule.
    BasePositionRule {
        /// The winning rule.
        rule_id: Uuid,
    },
    /// The department configured on the base position.
    BasePosition,
}

/// The department chosen for a request and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Department that should own the request.
    pub department: String,
    /// Tier that produced the decision.
    pub source: RoutingSource,
    /// Responsible person of the winning rule. Always `None` for the
    /// base-position fallback.
    pub responsible: Option<Person>,
}

/// The request attributes rules are matched against.
#[derive(Debug, Clone, Copy)]
struct MatchTarget<'a> {
    project_id: Uuid,
    discipline: Option<&'a str>,
    location_id: Option<Uuid>,
    base_position_id: Option<Uuid>,
}

/// How a relevant rule matched. Ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MatchRank {
    score: u8,
    discipline: bool,
    location: bool,
}

fn same<T: PartialEq>(rule: Option<T>, target: Option<T>) -> bool {
    rule.is_none() || rule == target
}

impl MatchTarget<'_> {
    /// Returns the rule's rank, or `None` if any set attribute contradicts.
    fn rank(&self, rule: &RoutingRule) -> Option<MatchRank> {
        let relevant = same(rule.project_id, Some(self.project_id))
            && same(rule.discipline.as_deref(), self.discipline)
            && same(rule.location_id, self.location_id)
            && same(rule.base_position_id, self.base_position_id);
        if !relevant {
            return None;
        }

        let project = rule.project_id.is_some();
        let discipline = rule.discipline.is_some();
        let location = rule.location_id.is_some();

        let mut score = 0;
        if project {
            score += PROJECT_WEIGHT;
        }
        if discipline {
            score += DISCIPLINE_WEIGHT;
        }
        if location {
            score += LOCATION_WEIGHT;
        }

        Some(MatchRank {
            score,
            discipline,
            location,
        })
    }
}

/// Picks the department for an unassigned request.
///
/// The router never writes to the request and never logs collaborator
/// failures; it returns them to the caller.
#[derive(Clone)]
pub struct RequestRouter {
    rules: Arc<dyn RoutingRuleStore>,
    positions: Arc<dyn PositionResolver>,
    departments: Arc<dyn DepartmentLookup>,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter").finish_non_exhaustive()
    }
}

impl RequestRouter {
    /// Creates a router over the given collaborators.
    pub fn new(
        rules: Arc<dyn RoutingRuleStore>,
        positions: Arc<dyn PositionResolver>,
        departments: Arc<dyn DepartmentLookup>,
    ) -> Self {
        Self {
            rules,
            positions,
            departments,
        }
    }

    /// Returns the best department for the request, or `None`.
    ///
    /// A position that no longer exists is not an error: base-position
    /// rules and the base-position fallback simply cannot match.
    ///
    /// # Errors
    ///
    /// Propagates store and collaborator failures (typically
    /// [`ReqflowError::Integration`]).
    pub async fn route(&self, request: &Request) -> Result<Option<RoutingDecision>> {
        let rules = self.rules.list_all().await?;

        let position = match request.position_id {
            Some(id) => self.positions.resolve_position(id).await?,
            None => None,
        };

        let target = MatchTarget {
            project_id: request.project_id,
            discipline: request.discipline.as_deref(),
            location_id: request.location_id,
            base_position_id: position.as_ref().map(|p| p.base_position_id),
        };

        if let Some(decision) = select_scored(&rules, &target) {
            return Ok(Some(decision));
        }
        if let Some(decision) = select_base_position_rule(&rules, &target) {
            return Ok(Some(decision));
        }

        let Some(configured) = position.and_then(|p| p.base_position_department) else {
            return Ok(None);
        };
        let resolved = self.departments.resolve(&configured).await?;
        Ok(resolved.map(|department| RoutingDecision {
            department: department.full_path,
            source: RoutingSource::BasePosition,
            responsible: None,
        }))
    }
}

fn select_scored(rules: &[RoutingRule], target: &MatchTarget<'_>) -> Option<RoutingDecision> {
    let mut best: Option<(&RoutingRule, MatchRank)> = None;
    for rule in rules {
        let Some(rank) = target.rank(rule) else {
            continue;
        };
        if rank.score < PRIMARY_THRESHOLD {
            continue;
        }
        // Strictly greater keeps the earliest rule on a full tie.
        if best.map_or(true, |(_, current)| rank > current) {
            best = Some((rule, rank));
        }
    }

    best.map(|(rule, rank)| {
        debug!(rule_id = %rule.id, score = rank.score, department = %rule.department, "scored rule selected");
        RoutingDecision {
            department: rule.department.clone(),
            source: RoutingSource::Rule {
                rule_id: rule.id,
                score: rank.score,
            },
            responsible: rule.responsible.clone(),
        }
    })
}

fn select_base_position_rule(
    rules: &[RoutingRule],
    target: &MatchTarget<'_>,
) -> Option<RoutingDecision> {
    let base_position_id = target.base_position_id?;
    rules
        .iter()
        .find(|rule| rule.is_base_position_only() && rule.base_position_id == Some(base_position_id))
        .map(|rule| RoutingDecision {
            department: rule.department.clone(),
            source: RoutingSource::BasePositionRule { rule_id: rule.id },
            responsible: rule.responsible.clone(),
        })
}

/// An in-memory org chart implementing [`PositionResolver`] and
/// [`DepartmentLookup`], suitable for testing and development.
///
/// Call [`set_unreachable`](Self::set_unreachable) to simulate an outage.
#[derive(Debug, Default)]
pub struct InMemoryOrgChart {
    positions: HashMap<Uuid, Position>,
    departments: HashMap<String, Department>,
    unreachable: AtomicBool,
}

impl InMemoryOrgChart {
    /// Creates an empty org chart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a position.
    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.insert(position.id, position);
        self
    }

    /// Adds a department, keyed by its full path.
    pub fn with_department(mut self, full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        self.departments
            .insert(full_path.clone(), Department { full_path });
        self
    }

    /// Makes every lookup fail with an integration error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ReqflowError::Integration(
                "org chart is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PositionResolver for InMemoryOrgChart {
    async fn resolve_position(&self, position_id: Uuid) -> Result<Option<Position>> {
        self.check_reachable()?;
        Ok(self.positions.get(&position_id).cloned())
    }
}

#[async_trait]
impl DepartmentLookup for InMemoryOrgChart {
    async fn resolve(&self, department: &str) -> Result<Option<Department>> {
        self.check_reachable()?;
        Ok(self.departments.get(department).cloned())
    }
}
