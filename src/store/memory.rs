//! In-memory store implementation.
//!
//! This module provides [`MemoryStore`], a thread-safe in-memory
//! implementation of [`RequestStore`] and [`RoutingRuleStore`] suitable for
//! testing and development.

use crate::{ReqflowError, Request, Result, RoutingRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RequestStore, RoutingRuleStore};

#[derive(Debug, Default)]
struct Storage {
    requests: HashMap<Uuid, Request>,
    /// Kept in insertion order; routing breaks ties on it.
    rules: Vec<RoutingRule>,
}

/// An in-memory implementation of [`RequestStore`] and [`RoutingRuleStore`].
///
/// This implementation uses `Arc<RwLock<...>>` internally, making it
/// safe to clone and share across async tasks. The version check and the
/// write happen under one write lock, so concurrent saves of the same
/// request serialize and the loser gets a conflict.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    storage: Arc<RwLock<Storage>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored requests.
    pub async fn request_count(&self) -> usize {
        self.storage.read().await.requests.len()
    }

    /// Returns the number of stored rules.
    pub async fn rule_count(&self) -> usize {
        self.storage.read().await.rules.len()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: &Request) -> Result<()> {
        let mut storage = self.storage.write().await;
        if storage.requests.contains_key(&request.id) {
            return Err(ReqflowError::invalid_operation(
                request.id,
                "request already exists",
            ));
        }
        storage.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Request> {
        self.storage
            .read()
            .await
            .requests
            .get(&id)
            .cloned()
            .ok_or(ReqflowError::RequestNotFound(id))
    }

    async fn save(&self, request: &Request) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let stored = storage
            .requests
            .get_mut(&request.id)
            .ok_or(ReqflowError::RequestNotFound(request.id))?;

        if stored.version != request.version {
            return Err(ReqflowError::Conflict {
                request_id: request.id,
                expected: request.version,
                found: stored.version,
            });
        }

        let mut next = request.clone();
        next.version += 1;
        let version = next.version;
        *stored = next;
        Ok(version)
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        Ok(self.storage.read().await.requests.keys().copied().collect())
    }
}

#[async_trait]
impl RoutingRuleStore for MemoryStore {
    async fn save_rule(&self, rule: &RoutingRule) -> Result<()> {
        let mut storage = self.storage.write().await;
        match storage.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => storage.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn delete_rule(&self, id: Uuid) -> Result<()> {
        self.storage.write().await.rules.retain(|r| r.id != id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<RoutingRule>> {
        Ok(self.storage.read().await.rules.clone())
    }
}
