//! SQLite session storage (feature-gated).

use std::time::Duration;

use async_trait::async_trait;
use livecode_core::{
    Language, SessionFilter, SessionPatch, SessionState, SessionStorage, StorageError, unix_now,
};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use uuid::Uuid;

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    code TEXT NOT NULL,
    language TEXT NOT NULL,
    connected_users INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    last_op_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

const SELECT_ONE: &str = "SELECT id, code, language, connected_users, revision, last_op_id, created_at, updated_at
     FROM sessions WHERE id = ?";

/// SQLite storage implementation.
///
/// Every mutation runs inside a `BEGIN IMMEDIATE` transaction that reads
/// the row, applies the change in Rust and writes it back, so revision
/// checks and the participant floor behave exactly as in memory. Writers
/// hold the lock from the first read, so concurrent ones wait on the busy
/// timeout rather than failing on a lock upgrade.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to `database_url` (e.g. `sqlite://livecode.db`) and create
    /// the schema if needed.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options: SqliteConnectOptions = database_url.parse().map_err(internal)?;
        let pool = SqlitePoolOptions::new()
            .connect_with(options.create_if_missing(true).busy_timeout(BUSY_TIMEOUT))
            .await
            .map_err(internal)?;
        Self::with_pool(pool).await
    }

    /// In-memory database, mainly for tests.
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // a single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(internal)?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool.
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(SCHEMA).execute(&pool).await.map_err(internal)?;
        Ok(Self { pool })
    }

    async fn mutate<F>(&self, id: &str, f: F) -> Result<SessionState, StorageError>
    where
        F: FnOnce(&mut SessionState) -> Result<bool, StorageError> + Send,
    {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(internal)?;

        let row = sqlx::query(SELECT_ONE)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;
        let mut session = match row {
            Some(row) => from_row(&row)?,
            None => {
                let fresh = SessionState::new(id, unix_now());
                insert(&mut tx, &fresh).await?;
                fresh
            }
        };

        if f(&mut session)? {
            sqlx::query(
                "UPDATE sessions SET code = ?, language = ?, connected_users = ?, revision = ?,
                 last_op_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&session.code)
            .bind(session.language.as_str())
            .bind(i64::from(session.connected_users))
            .bind(revision_to_db(session.revision))
            .bind(session.last_op_id.map(|op| op.to_string()))
            .bind(session.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        }

        tx.commit().await.map_err(internal)?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStorage for SqliteStorage {
    async fn load_or_create(&self, id: &str) -> Result<SessionState, StorageError> {
        if let Some(session) = self.get(id).await? {
            return Ok(session);
        }
        self.mutate(id, |_| Ok(false)).await
    }

    async fn get(&self, id: &str) -> Result<Option<SessionState>, StorageError> {
        let row = sqlx::query(SELECT_ONE)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(from_row).transpose()
    }

    async fn apply(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, StorageError> {
        self.mutate(id, |session| Ok(session.apply_patch(patch, unix_now())?))
            .await
    }

    async fn adjust_participants(&self, id: &str, delta: i32) -> Result<SessionState, StorageError> {
        self.mutate(id, |session| {
            session.adjust_participants(delta, unix_now());
            Ok(true)
        })
        .await
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionState>, StorageError> {
        let limit = filter
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            "SELECT id, code, language, connected_users, revision, last_op_id, created_at, updated_at
             FROM sessions WHERE (?1 IS NULL OR language = ?1)
             ORDER BY updated_at DESC, id ASC LIMIT ?2",
        )
        .bind(filter.language.map(Language::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.iter().map(from_row).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session: &SessionState,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT OR IGNORE INTO sessions
         (id, code, language, connected_users, revision, last_op_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(&session.code)
    .bind(session.language.as_str())
    .bind(i64::from(session.connected_users))
    .bind(revision_to_db(session.revision))
    .bind(session.last_op_id.map(|op| op.to_string()))
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

fn from_row(row: &SqliteRow) -> Result<SessionState, StorageError> {
    let language: String = row.try_get("language").map_err(internal)?;
    let connected_users: i64 = row.try_get("connected_users").map_err(internal)?;
    let revision: i64 = row.try_get("revision").map_err(internal)?;
    let last_op_id: Option<String> = row.try_get("last_op_id").map_err(internal)?;

    Ok(SessionState {
        id: row.try_get("id").map_err(internal)?,
        code: row.try_get("code").map_err(internal)?,
        language: language.parse().map_err(internal)?,
        connected_users: u32::try_from(connected_users).unwrap_or(0),
        revision: u64::try_from(revision).unwrap_or(0),
        last_op_id: last_op_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
        updated_at: row.try_get("updated_at").map_err(internal)?,
    })
}

fn revision_to_db(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn internal(e: impl std::fmt::Display) -> StorageError {
    StorageError::Internal(e.to_string())
}
