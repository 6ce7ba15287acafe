//! 提醒持久化：SQLite 与内存两种实现
//!
//! 所有状态变更都是比较并交换（WHERE status = from），同一提醒的并发触发只有一方成功。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::RwLock;

use super::model::{Reminder, ReminderStatus, Transition};
use crate::core::StoreError;
use crate::storage::{from_millis, open_pool, parse_rfc3339};

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn insert(&self, reminder: &Reminder) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Reminder>, StoreError>;

    /// 按 due_at 升序
    async fn list_by_status(&self, status: ReminderStatus) -> Result<Vec<Reminder>, StoreError>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Reminder>, StoreError>;

    /// 仅当当前状态等于 transition.from 时更新；返回更新后的记录，未生效返回 None
    async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Option<Reminder>, StoreError>;
}

pub struct SqliteReminderStore {
    pool: SqlitePool,
}

impl SqliteReminderStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_pool(open_pool(db_path).await?).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                due_at_ms INTEGER NOT NULL,
                message TEXT NOT NULL,
                topic TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reminders_status_due ON reminders (status, due_at_ms)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn from_row(row: &SqliteRow) -> Result<Reminder, StoreError> {
        let status_str: String = row.get("status");
        let status = ReminderStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown reminder status {status_str:?}")))?;
        let attempts: i64 = row.get("attempts");
        Ok(Reminder {
            id: row.get("id"),
            session_id: row.get("session_id"),
            due_at: from_millis(row.get("due_at_ms"))?,
            message: row.get("message"),
            topic: row.get("topic"),
            status,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.get("last_error"),
            created_at: parse_rfc3339(&row.get::<String, _>("created_at"))?,
            updated_at: parse_rfc3339(&row.get::<String, _>("updated_at"))?,
        })
    }
}

const COLUMNS: &str =
    "id, session_id, due_at_ms, message, topic, status, attempts, last_error, created_at, updated_at";

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn insert(&self, reminder: &Reminder) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO reminders ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&reminder.id)
        .bind(&reminder.session_id)
        .bind(reminder.due_at.timestamp_millis())
        .bind(&reminder.message)
        .bind(&reminder.topic)
        .bind(reminder.status.as_str())
        .bind(i64::from(reminder.attempts))
        .bind(&reminder.last_error)
        .bind(reminder.created_at.to_rfc3339())
        .bind(reminder.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM reminders WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_by_status(&self, status: ReminderStatus) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM reminders WHERE status = ? ORDER BY due_at_ms ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM reminders WHERE session_id = ? ORDER BY due_at_ms ASC, id ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Option<Reminder>, StoreError> {
        let updated = sqlx::query(
            "UPDATE reminders
             SET status = ?, attempts = COALESCE(?, attempts),
                 last_error = COALESCE(?, last_error), updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(transition.to.as_str())
        .bind(transition.attempts.map(i64::from))
        .bind(&transition.last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(transition.from.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.get(id).await
    }
}

/// 内存提醒存储（测试或无需持久化的部署）
#[derive(Default)]
pub struct MemoryReminderStore {
    reminders: RwLock<HashMap<String, Reminder>>,
}

impl MemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut reminders: Vec<Reminder>) -> Vec<Reminder> {
    reminders.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.id.cmp(&b.id)));
    reminders
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn insert(&self, reminder: &Reminder) -> Result<(), StoreError> {
        self.reminders
            .write()
            .await
            .insert(reminder.id.clone(), reminder.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        Ok(self.reminders.read().await.get(id).cloned())
    }

    async fn list_by_status(&self, status: ReminderStatus) -> Result<Vec<Reminder>, StoreError> {
        let all = self.reminders.read().await;
        Ok(sorted(
            all.values().filter(|r| r.status == status).cloned().collect(),
        ))
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Reminder>, StoreError> {
        let all = self.reminders.read().await;
        Ok(sorted(
            all.values()
                .filter(|r| r.session_id == session_id)
                .cloned()
                .collect(),
        ))
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Option<Reminder>, StoreError> {
        let mut all = self.reminders.write().await;
        let reminder = all
            .get_mut(id)
            .ok_or_else(|| StoreError::ReminderNotFound(id.to_string()))?;
        if reminder.status != transition.from {
            return Ok(None);
        }
        reminder.status = transition.to;
        if let Some(attempts) = transition.attempts {
            reminder.attempts = attempts;
        }
        if transition.last_error.is_some() {
            reminder.last_error = transition.last_error;
        }
        reminder.updated_at = Utc::now();
        Ok(Some(reminder.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;
    use chrono::Duration;
    use std::sync::Arc;

    async fn sqlite_store() -> SqliteReminderStore {
        SqliteReminderStore::from_pool(memory_pool().await.unwrap())
            .await
            .unwrap()
    }

    async fn check_cas_only_once(store: Arc<dyn ReminderStore>) {
        let r = Reminder::new("u1", Utc::now(), "boil water", "souschef");
        store.insert(&r).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = r.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(
                        &id,
                        Transition::new(ReminderStatus::Pending, ReminderStatus::Fired),
                    )
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let stored = store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Fired);
    }

    #[tokio::test]
    async fn test_memory_transition_is_compare_and_set() {
        check_cas_only_once(Arc::new(MemoryReminderStore::new())).await;
    }

    #[tokio::test]
    async fn test_sqlite_transition_is_compare_and_set() {
        check_cas_only_once(Arc::new(sqlite_store().await)).await;
    }

    #[tokio::test]
    async fn test_sqlite_transition_records_attempts_and_error() {
        let store = sqlite_store().await;
        let r = Reminder::new("u1", Utc::now(), "flip the pancakes", "kitchen");
        store.insert(&r).await.unwrap();
        store
            .transition(&r.id, Transition::new(ReminderStatus::Pending, ReminderStatus::Fired))
            .await
            .unwrap();
        let failed = store
            .transition(
                &r.id,
                Transition::new(ReminderStatus::Fired, ReminderStatus::Failed)
                    .with_attempts(3)
                    .with_error("HTTP 503"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ReminderStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(failed.due_at, r.due_at);
        assert_eq!(failed.topic, "kitchen");
    }

    #[tokio::test]
    async fn test_sqlite_lists_pending_in_due_order() {
        let store = sqlite_store().await;
        let now = Utc::now();
        let later = Reminder::new("u1", now + Duration::minutes(10), "later", "t");
        let sooner = Reminder::new("u2", now + Duration::minutes(1), "sooner", "t");
        store.insert(&later).await.unwrap();
        store.insert(&sooner).await.unwrap();

        let pending = store.list_by_status(ReminderStatus::Pending).await.unwrap();
        let messages: Vec<&str> = pending.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["sooner", "later"]);
        assert_eq!(store.list_for_session("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_reminders_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.db");
        let r = Reminder::new("u1", Utc::now(), "preheat oven", "t");
        {
            let store = SqliteReminderStore::open(&path).await.unwrap();
            store.insert(&r).await.unwrap();
        }
        let store = SqliteReminderStore::open(&path).await.unwrap();
        assert_eq!(store.get(&r.id).await.unwrap().unwrap().message, "preheat oven");
    }
}
