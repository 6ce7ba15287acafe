//! SQLite 会话存储
//!
//! 会话元数据、轮次、偏好三张表；每次写入一个事务，提交后返回。
//! 轮次按 (session_id, seq) 主键保存，seq 在会话锁内分配，保证追加顺序即存储顺序。

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::model::{Role, Session, Turn};
use super::store::{SessionLocks, SessionStore};
use crate::core::StoreError;
use crate::storage::{open_pool, parse_rfc3339};

pub struct SqliteSessionStore {
    pool: SqlitePool,
    locks: SessionLocks,
}

impl SqliteSessionStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let pool = open_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    /// 从连接池创建（与提醒存储共用）
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            locks: SessionLocks::new(),
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_turns (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_name TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_preferences (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn session_exists(
        conn: &mut sqlx::SqliteConnection,
        id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let Some(row) = sqlx::query("SELECT id, created_at, updated_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let created_at = parse_rfc3339(&row.get::<String, _>("created_at"))?;
        let updated_at = parse_rfc3339(&row.get::<String, _>("updated_at"))?;

        let turn_rows = sqlx::query(
            "SELECT role, content, tool_name, created_at FROM session_turns
             WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(turn_rows.len());
        for row in turn_rows {
            let role_str: String = row.get("role");
            let role = Role::parse(&role_str)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role {role_str:?}")))?;
            turns.push(Turn {
                role,
                content: row.get("content"),
                tool_name: row.get("tool_name"),
                timestamp: parse_rfc3339(&row.get::<String, _>("created_at"))?,
            });
        }

        let pref_rows = sqlx::query("SELECT key, value FROM session_preferences WHERE session_id = ?")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let preferences: BTreeMap<String, String> = pref_rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();

        Ok(Some(Session {
            id: id.to_string(),
            turns,
            preferences,
            created_at,
            updated_at,
        }))
    }

    async fn create(
        &self,
        id: &str,
        preferences: BTreeMap<String, String>,
    ) -> Result<Session, StoreError> {
        {
            let _guard = self.locks.acquire(id).await;
            let mut tx = self.pool.begin().await?;
            if !Self::session_exists(&mut tx, id).await? {
                let now = Utc::now().to_rfc3339();
                sqlx::query("INSERT INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
                    .bind(id)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                for (key, value) in &preferences {
                    sqlx::query(
                        "INSERT INTO session_preferences (session_id, key, value) VALUES (?, ?, ?)",
                    )
                    .bind(id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                tracing::debug!(session_id = %id, "session created");
            }
            tx.commit().await?;
        }

        self.load(id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<(), StoreError> {
        if turns.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(id).await;
        // 事务未提交即被丢弃（取消）时自动回滚
        let mut tx = self.pool.begin().await?;
        if !Self::session_exists(&mut tx, id).await? {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }

        let last_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) FROM session_turns WHERE session_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, turn) in turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO session_turns (session_id, seq, role, content, tool_name, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(last_seq + 1 + offset as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(&turn.tool_name)
            .bind(turn.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_preference(&self, id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.pool.begin().await?;
        if !Self::session_exists(&mut tx, id).await? {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        sqlx::query(
            "INSERT INTO session_preferences (session_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<bool, StoreError> {
        let existed = {
            let _guard = self.locks.acquire(id).await;
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM session_turns WHERE session_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM session_preferences WHERE session_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            deleted > 0
        };
        self.locks.forget(id);
        if existed {
            tracing::info!(session_id = %id, "session reset");
        }
        Ok(existed)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar("SELECT id FROM sessions ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}
