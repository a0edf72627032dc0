//! SQLite persistence for conversation turns.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// One recorded conversation turn.
#[derive(Debug, Clone)]
pub struct SessionTurn {
    /// When the turn was recorded.
    pub ts: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_id: String,
    /// The user's message for this turn.
    pub user_message: String,
    /// Per-turn slow-burn risk score.
    pub risk_score: f64,
}

#[derive(Debug, FromRow)]
struct SessionTurnRow {
    ts: String,
    tenant_id: String,
    user_message: String,
    risk_score: f64,
}

impl From<SessionTurnRow> for SessionTurn {
    fn from(row: SessionTurnRow) -> Self {
        let ts = DateTime::parse_from_rfc3339(&row.ts)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Self {
            ts,
            tenant_id: row.tenant_id,
            user_message: row.user_message,
            risk_score: row.risk_score,
        }
    }
}

/// SQLite-backed store of recent turns, bounded per session.
pub struct SqliteTurnStore {
    pool: SqlitePool,
}

impl SqliteTurnStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn new(path: &Path, max_connections: u32) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("failed to create database directory: {e}"),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("failed to open {}: {e}", path.display()),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: e.to_string(),
            })?;

        info!(path = %path.display(), "Session turn store initialized");
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("failed to open in-memory database: {e}"),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// Insert a turn and drop rows past the per-session cap. One transaction
    /// so readers never see an over-length session.
    pub async fn insert_turn(
        &self,
        session_id: &str,
        tenant_id: &str,
        user_message: &str,
        risk_score: f64,
        max_turns: i64,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        sqlx::query(
            "INSERT INTO session_turns (ts, session_id, tenant_id, user_message, risk_score)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .bind(tenant_id)
        .bind(user_message)
        .bind(risk_score)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        sqlx::query(
            "DELETE FROM session_turns
             WHERE id IN (
                 SELECT id FROM session_turns
                 WHERE session_id = ?
                 ORDER BY id DESC
                 LIMIT -1 OFFSET ?
             )",
        )
        .bind(session_id)
        .bind(max_turns)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        debug!(session_id, risk_score, "Recorded conversation turn");
        Ok(())
    }

    /// Last `limit` turns for a session, oldest first.
    pub async fn recent_turns(&self, session_id: &str, limit: i64) -> StorageResult<Vec<SessionTurn>> {
        let rows: Vec<SessionTurnRow> = sqlx::query_as(
            "SELECT ts, tenant_id, user_message, risk_score
             FROM session_turns
             WHERE session_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let mut turns: Vec<SessionTurn> = rows.into_iter().map(SessionTurn::from).collect();
        turns.reverse();
        Ok(turns)
    }

    /// Delete all turns for a session. Returns the number removed.
    pub async fn clear_session(&self, session_id: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM session_turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    /// Delete turns older than `cutoff` across all sessions. Returns the
    /// number removed.
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM session_turns WHERE ts < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}
