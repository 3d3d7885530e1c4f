//! Persistence for requests and routing rules.
//!
//! This module provides the [`RequestStore`] and [`RoutingRuleStore`]
//! traits, along with concrete implementations:
//!
//! - [`MemoryStore`]: Thread-safe in-memory storage for testing/development
//! - [`SqliteStore`]: SQLite-backed storage (requires the `sqlite` feature)
//!
//! Requests carry a `version` used for optimistic concurrency: a save only
//! succeeds if the stored version still equals the version the caller
//! loaded, and every successful save bumps it by one.
//!
//! # Example
//!
//! ```
//! use reqflow::{AllocationKind, MemoryStore, Person, Request, RequestStore, RequestType};
//! use uuid::Uuid;
//!
//! # async fn example() -> reqflow::Result<()> {
//! let store = MemoryStore::new();
//! let request = Request::new(
//!     RequestType::Allocation(AllocationKind::Normal),
//!     Uuid::new_v4(),
//!     Person::new(Uuid::new_v4(), "Creator"),
//! );
//! store.insert(&request).await?;
//!
//! let mut loaded = store.load(request.id).await?;
//! loaded.discipline = Some("Piping".to_string());
//! let version = store.save(&loaded).await?;
//! assert_eq!(version, 1);
//! # Ok(())
//! # }
//! ```

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::{Request, Result, RoutingRule};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Persists requests together with their workflow rows.
///
/// This trait is object-safe; the orchestrator holds it as
/// `Arc<dyn RequestStore>`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Stores a new request.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::InvalidOperation`](crate::ReqflowError::InvalidOperation)
    /// if a request with the same id already exists.
    async fn insert(&self, request: &Request) -> Result<()>;

    /// Loads a request by id.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::RequestNotFound`](crate::ReqflowError::RequestNotFound)
    /// if no such request exists.
    async fn load(&self, id: Uuid) -> Result<Request>;

    /// Saves a request and returns its new version.
    ///
    /// The request row and its workflow rows are written atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Conflict`](crate::ReqflowError::Conflict) if
    /// the stored version differs from `request.version`, and
    /// [`ReqflowError::RequestNotFound`](crate::ReqflowError::RequestNotFound)
    /// if the request was never inserted.
    async fn save(&self, request: &Request) -> Result<u64>;

    /// Lists the ids of every stored request.
    async fn list(&self) -> Result<Vec<Uuid>>;
}

/// Persists the responsibility matrix.
#[async_trait]
pub trait RoutingRuleStore: Send + Sync {
    /// Inserts or replaces a rule. Replacing keeps the rule's position.
    async fn save_rule(&self, rule: &RoutingRule) -> Result<()>;

    /// Deletes a rule. Deleting an unknown rule is not an error.
    async fn delete_rule(&self, id: Uuid) -> Result<()>;

    /// Returns every rule, in insertion order.
    async fn list_all(&self) -> Result<Vec<RoutingRule>>;
}

/// A store opened from configuration, usable as both store traits.
#[derive(Debug, Clone)]
pub enum StoreHandle {
    /// In-memory store.
    Memory(MemoryStore),
    /// SQLite store.
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<SqliteStore>),
}

impl StoreHandle {
    /// Opens the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Config`](crate::ReqflowError::Config) if the sqlite backend is selected
    /// but the crate was built without the `sqlite` feature, or any error
    /// from opening the database.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Memory => Ok(Self::Memory(MemoryStore::new())),
            #[cfg(feature = "sqlite")]
            StoreBackend::Sqlite => Ok(Self::Sqlite(Arc::new(
                SqliteStore::open(&config.path).await?,
            ))),
            #[cfg(not(feature = "sqlite"))]
            StoreBackend::Sqlite => Err(crate::ReqflowError::Config(
                "the sqlite backend requires the `sqlite` feature".to_string(),
            )),
        }
    }

    /// Returns the handle as a request store.
    pub fn requests(&self) -> Arc<dyn RequestStore> {
        match self {
            Self::Memory(store) => Arc::new(store.clone()),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(store) => store.clone(),
        }
    }

    /// Returns the handle as a routing rule store.
    pub fn rules(&self) -> Arc<dyn RoutingRuleStore> {
        match self {
            Self::Memory(store) => Arc::new(store.clone()),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(store) => store.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_backend() {
        let handle = StoreHandle::open(&StoreConfig::default()).await.unwrap();
        assert!(matches!(handle, StoreHandle::Memory(_)));

        let rule = RoutingRule::new("PRD");
        handle.rules().save_rule(&rule).await.unwrap();
        assert_eq!(handle.rules().list_all().await.unwrap(), vec![rule]);
        assert!(handle.requests().list().await.unwrap().is_empty());
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn test_sqlite_backend_needs_feature() {
        use crate::ReqflowError;

        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: "reqflow.db".to_string(),
        };
        assert!(matches!(
            StoreHandle::open(&config).await,
            Err(ReqflowError::Config(_))
        ));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: dir.path().join("reqflow.db").display().to_string(),
        };
        let handle = StoreHandle::open(&config).await.unwrap();
        assert!(matches!(handle, StoreHandle::Sqlite(_)));
    }
}
