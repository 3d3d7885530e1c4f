//! SQLite-backed store implementation.
//!
//! This module provides [`SqliteStore`], a persistent implementation of
//! [`RequestStore`] and [`RoutingRuleStore`] backed by SQLite.
//!
//! A request is split across two tables: the request row (with an empty
//! step list) in `requests`, and one row per workflow step in
//! `workflow_steps`. Saves rewrite both inside one transaction.

use crate::{ReqflowError, Request, Result, RoutingRule, WorkflowStep};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use super::{RequestStore, RoutingRuleStore};

/// Schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    )
"#;

const CREATE_REQUESTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS requests (
        id TEXT NOT NULL PRIMARY KEY,
        version INTEGER NOT NULL,
        data_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

const CREATE_WORKFLOW_STEPS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_steps (
        request_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        step_id TEXT NOT NULL,
        step_json TEXT NOT NULL,
        PRIMARY KEY (request_id, step_id)
    )
"#;

const CREATE_ROUTING_RULES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS routing_rules (
        id TEXT NOT NULL PRIMARY KEY,
        rule_json TEXT NOT NULL
    )
"#;

/// A request serialized for storage.
struct EncodedRequest {
    id: String,
    version: u64,
    data_json: String,
    /// `(step_id, step_json)` in chain order.
    steps: Vec<(String, String)>,
}

impl EncodedRequest {
    fn new(request: &Request) -> Result<Self> {
        let mut stripped = request.clone();
        let steps = stripped
            .workflow
            .as_mut()
            .map(|w| std::mem::take(&mut w.steps))
            .unwrap_or_default();

        let steps = steps
            .iter()
            .map(|step| Ok((step.id.clone(), serde_json::to_string(step)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: request.id.to_string(),
            version: request.version,
            data_json: serde_json::to_string(&stripped)?,
            steps,
        })
    }
}

/// Lets a blocking write see whether its caller is still awaiting it.
struct Caller(oneshot::Sender<()>);

impl Caller {
    fn is_gone(&self) -> bool {
        self.0.is_closed()
    }
}

enum SaveOutcome {
    Saved(u64),
    Missing,
    Stale(u64),
    Abandoned,
}

/// A SQLite-backed implementation of [`RequestStore`] and
/// [`RoutingRuleStore`].
///
/// The store wraps the SQLite connection in a `Mutex` and uses
/// `spawn_blocking` for all database operations, making it safe for use in
/// async contexts. The version check for optimistic concurrency runs inside
/// the same transaction as the write.
///
/// # Example
///
/// ```rust,ignore
/// use reqflow::SqliteStore;
///
/// // Open or create a database file
/// let store = SqliteStore::open("reqflow.db").await?;
///
/// // Or use an in-memory database for testing
/// let store = SqliteStore::open_in_memory().await?;
/// ```
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens a SQLite database at the given path.
    ///
    /// Creates the database and schema if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || Connection::open(&path))
            .await
            .map_err(|e| ReqflowError::Store(format!("spawn_blocking failed: {e}")))?
            .map_err(|e| ReqflowError::Database(format!("failed to open database: {e}")))?;
        Self::from_connection(conn).await
    }

    /// Opens an in-memory SQLite database.
    ///
    /// Useful for testing. The database is lost when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory)
            .await
            .map_err(|e| ReqflowError::Store(format!("spawn_blocking failed: {e}")))?
            .map_err(|e| {
                ReqflowError::Database(format!("failed to open in-memory database: {e}"))
            })?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, context: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| ReqflowError::Store(format!("spawn_blocking failed: {e}")))?
        .map_err(|e| ReqflowError::Database(format!("{context} failed: {e}")))
    }

    /// Like [`with_conn`](Self::with_conn), for writes: `f` receives a
    /// [`Caller`] and must not commit once the caller has gone away.
    async fn with_caller<T, F>(&self, context: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &Caller) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (alive, waiting) = oneshot::channel::<()>();
        let caller = Caller(alive);
        let result = self.with_conn(context, move |conn| f(conn, &caller)).await;
        drop(waiting);
        result
    }

    async fn run_migrations(&self) -> Result<()> {
        self.with_conn("migration", |conn| {
            conn.execute(CREATE_SCHEMA_VERSION_TABLE, [])?;

            let version: Option<i32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;

            if version.map_or(true, |v| v < SCHEMA_VERSION) {
                let tx = conn.transaction()?;
                tx.execute(CREATE_REQUESTS_TABLE, [])?;
                tx.execute(CREATE_WORKFLOW_STEPS_TABLE, [])?;
                tx.execute(CREATE_ROUTING_RULES_TABLE, [])?;
                tx.execute("DELETE FROM schema_version", [])?;
                tx.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
                tx.commit()?;
            }
            Ok(())
        })
        .await
    }

    /// Checks if the required tables exist.
    pub async fn tables_exist(&self) -> Result<bool> {
        self.with_conn("table check", |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('requests', 'workflow_steps', 'routing_rules', 'schema_version')",
                [],
                |row| row.get(0),
            )?;
            Ok(count == 4)
        })
        .await
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn replace_steps(tx: &Transaction<'_>, request_id: &str, steps: &[(String, String)]) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM workflow_steps WHERE request_id = ?1",
        params![request_id],
    )?;
    let mut stmt = tx.prepare(
        "INSERT INTO workflow_steps (request_id, position, step_id, step_json) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, (step_id, step_json)) in steps.iter().enumerate() {
        stmt.execute(params![request_id, position as i64, step_id, step_json])?;
    }
    Ok(())
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn insert(&self, request: &Request) -> Result<()> {
        let encoded = EncodedRequest::new(request)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let inserted = self
            .with_caller("insert", move |conn, caller| {
                let tx = conn.transaction()?;
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM requests WHERE id = ?1",
                        params![encoded.id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO requests (id, version, data_json, updated_at) VALUES (?1, ?2, ?3, ?4)",
                    params![encoded.id, encoded.version, encoded.data_json, updated_at],
                )?;
                replace_steps(&tx, &encoded.id, &encoded.steps)?;
                if caller.is_gone() {
                    return Ok(false);
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(ReqflowError::invalid_operation(
                request.id,
                "request already exists",
            ))
        }
    }

    async fn load(&self, id: Uuid) -> Result<Request> {
        let key = id.to_string();
        let row = self
            .with_conn("load", move |conn| {
                let head: Option<(u64, String)> = conn
                    .query_row(
                        "SELECT version, data_json FROM requests WHERE id = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((version, data_json)) = head else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    "SELECT step_json FROM workflow_steps WHERE request_id = ?1 ORDER BY position",
                )?;
                let steps = stmt
                    .query_map(params![key], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(Some((version, data_json, steps)))
            })
            .await?;

        let (version, data_json, steps) = row.ok_or(ReqflowError::RequestNotFound(id))?;
        let mut request: Request = serde_json::from_str(&data_json)?;
        request.version = version;
        if let Some(workflow) = request.workflow.as_mut() {
            workflow.steps = steps
                .iter()
                .map(|json| serde_json::from_str::<WorkflowStep>(json))
                .collect::<std::result::Result<_, _>>()?;
        }
        Ok(request)
    }

    async fn save(&self, request: &Request) -> Result<u64> {
        let encoded = EncodedRequest::new(request)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let outcome = self
            .with_caller("save", move |conn, caller| {
                let tx = conn.transaction()?;
                let found: Option<u64> = tx
                    .query_row(
                        "SELECT version FROM requests WHERE id = ?1",
                        params![encoded.id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let outcome = match found {
                    None => SaveOutcome::Missing,
                    Some(found) if found != encoded.version => SaveOutcome::Stale(found),
                    Some(found) => {
                        let next = found + 1;
                        tx.execute(
                            "UPDATE requests SET version = ?2, data_json = ?3, updated_at = ?4 WHERE id = ?1",
                            params![encoded.id, next, encoded.data_json, updated_at],
                        )?;
                        replace_steps(&tx, &encoded.id, &encoded.steps)?;
                        SaveOutcome::Saved(next)
                    }
                };
                if caller.is_gone() {
                    return Ok(SaveOutcome::Abandoned);
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            SaveOutcome::Saved(version) => Ok(version),
            SaveOutcome::Missing => Err(ReqflowError::RequestNotFound(request.id)),
            SaveOutcome::Abandoned => Err(ReqflowError::Store(format!(
                "save of request {} was abandoned",
                request.id
            ))),
            SaveOutcome::Stale(found) => Err(ReqflowError::Conflict {
                request_id: request.id,
                expected: request.version,
                found,
            }),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let ids = self
            .with_conn("list", |conn| {
                let mut stmt = conn.prepare("SELECT id FROM requests ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        ids.iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|e| ReqflowError::Store(format!("corrupt request id '{id}': {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl RoutingRuleStore for SqliteStore {
    async fn save_rule(&self, rule: &RoutingRule) -> Result<()> {
        let id = rule.id.to_string();
        let rule_json = serde_json::to_string(rule)?;
        self.with_conn("rule upsert", move |conn| {
            conn.execute(
                "INSERT INTO routing_rules (id, rule_json) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET rule_json = excluded.rule_json",
                params![id, rule_json],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let id = id.to_string();
        self.with_conn("rule delete", move |conn| {
            conn.execute("DELETE FROM routing_rules WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<RoutingRule>> {
        let rows = self
            .with_conn("rule list", |conn| {
                let mut stmt = conn.prepare("SELECT rule_json FROM routing_rules ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        rows.iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocationKind, Person, RequestType, SkipContext, StepState, WorkflowVariant};

    fn creator() -> Person {
        Person::new(Uuid::new_v4(), "Creator")
    }

    fn active_request() -> Request {
        let mut request = Request::new(
            RequestType::Allocation(AllocationKind::Normal),
            Uuid::new_v4(),
            creator(),
        );
        let variant = WorkflowVariant::Normal;
        let workflow = variant
            .new_workflow(creator(), &SkipContext::empty())
            .unwrap();
        request.workflow = Some(variant.persist(&workflow));
        request
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.tables_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reqflow.db");
        let request = active_request();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert(&request).await.unwrap();
            store.save_rule(&RoutingRule::new("PRD")).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert!(store.tables_exist().await.unwrap());
        assert_eq!(store.load(request.id).await.unwrap(), request);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_restores_steps_in_order() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = active_request();
        store.insert(&request).await.unwrap();

        let loaded = store.load(request.id).await.unwrap();
        let workflow = loaded.workflow.unwrap();
        let ids: Vec<_> = workflow.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["created", "proposal", "approval", "provisioning"]);
        assert_eq!(workflow.steps[0].state, StepState::Approved);
        assert_eq!(workflow.current_step_id, "proposal");
    }

    #[tokio::test]
    async fn test_draft_request_has_no_steps() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = Request::new(RequestType::ContractorPersonnel, Uuid::new_v4(), creator());
        store.insert(&request).await.unwrap();
        let loaded = store.load(request.id).await.unwrap();
        assert!(loaded.workflow.is_none());
        assert!(loaded.is_draft());
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = active_request();
        store.insert(&request).await.unwrap();
        assert!(matches!(
            store.insert(&request).await,
            Err(ReqflowError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(ReqflowError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_updates_steps_and_version() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = active_request();
        store.insert(&request).await.unwrap();

        let mut loaded = store.load(request.id).await.unwrap();
        let workflow = loaded.workflow.as_mut().unwrap();
        workflow.steps[1].state = StepState::Approved;
        workflow.current_step_id = "approval".to_string();
        assert_eq!(store.save(&loaded).await.unwrap(), 1);

        let reloaded = store.load(request.id).await.unwrap();
        assert_eq!(reloaded.version, 1);
        let workflow = reloaded.workflow.unwrap();
        assert_eq!(workflow.current_step_id, "approval");
        assert_eq!(workflow.steps[1].state, StepState::Approved);
        assert_eq!(workflow.steps.len(), 4);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts_and_leaves_row_untouched() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = active_request();
        store.insert(&request).await.unwrap();

        let first = store.load(request.id).await.unwrap();
        let mut second = store.load(request.id).await.unwrap();
        store.save(&first).await.unwrap();

        second.discipline = Some("Electrical".to_string());
        let err = store.save(&second).await.unwrap_err();
        assert!(matches!(
            err,
            ReqflowError::Conflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert!(store.load(request.id).await.unwrap().discipline.is_none());
    }

    #[tokio::test]
    async fn test_dropped_save_rolls_back() {
        use std::time::Duration;

        let store = SqliteStore::open_in_memory().await.unwrap();
        let request = active_request();
        store.insert(&request).await.unwrap();

        let mut edited = store.load(request.id).await.unwrap();
        edited.discipline = Some("Piping".to_string());

        let guard = store.conn.lock().await;
        let save = store.save(&edited);
        assert!(tokio::time::timeout(Duration::from_millis(50), save)
            .await
            .is_err());
        drop(guard);

        for _ in 0..2 {
            let reloaded = store.load(request.id).await.unwrap();
            assert_eq!(reloaded.version, 0);
            assert!(reloaded.discipline.is_none());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // The connection is still usable afterwards.
        assert_eq!(store.save(&edited).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_requests() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let a = active_request();
        let b = active_request();
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id));
        assert!(ids.contains(&b.id));
    }

    #[tokio::test]
    async fn test_rule_upsert_keeps_order() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let a = RoutingRule::new("A");
        let b = RoutingRule::new("B");
        store.save_rule(&a).await.unwrap();
        store.save_rule(&b).await.unwrap();

        let mut replaced = a.clone();
        replaced.department = "A2".to_string();
        store.save_rule(&replaced).await.unwrap();

        let departments: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.department)
            .collect();
        assert_eq!(departments, vec!["A2", "B"]);

        store.delete_rule(b.id).await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }
}
