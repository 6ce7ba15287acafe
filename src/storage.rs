//! SQLite 连接池
//!
//! 会话与提醒共用一个连接池；synchronous=FULL 保证事务提交返回前已落盘。

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::core::StoreError;
use crate::reminders::{MemoryReminderStore, ReminderStore, SqliteReminderStore};
use crate::session::{MemorySessionStore, SessionStore, SqliteSessionStore};

/// 打开（必要时创建）数据库文件
pub async fn open_pool(db_path: impl AsRef<Path>) -> Result<SqlitePool, StoreError> {
    let path = db_path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Corrupt(format!("cannot create {:?}: {}", parent, e)))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 内存数据库（单连接，连接不过期，否则库随连接消失）
pub async fn memory_pool() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 会话与提醒存储
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub reminders: Arc<dyn ReminderStore>,
    /// 持久化模式下的共享连接池（关闭时需要 close）
    pub pool: Option<SqlitePool>,
}

/// 创建存储
///
/// 提供 db_path 时两者共用一个 SQLite 连接池；否则使用内存存储
pub async fn open_stores(db_path: Option<&Path>) -> Result<Stores, StoreError> {
    match db_path {
        Some(path) => {
            let pool = open_pool(path).await?;
            let sessions = SqliteSessionStore::from_pool(pool.clone()).await?;
            let reminders = SqliteReminderStore::from_pool(pool.clone()).await?;
            tracing::info!(path = %path.display(), "using persistent storage");
            Ok(Stores {
                sessions: Arc::new(sessions),
                reminders: Arc::new(reminders),
                pool: Some(pool),
            })
        }
        None => {
            tracing::warn!("no storage.db_path configured, sessions and reminders will not survive restarts");
            Ok(Stores {
                sessions: Arc::new(MemorySessionStore::new()),
                reminders: Arc::new(MemoryReminderStore::new()),
                pool: None,
            })
        }
    }
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("bad millisecond timestamp {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::{Reminder, ReminderStatus};
    use crate::session::Turn;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_open_stores_shares_one_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("souschef.db");

        {
            let stores = open_stores(Some(&path)).await.unwrap();
            stores.sessions.create("u1", BTreeMap::new()).await.unwrap();
            stores.sessions.append_turn("u1", Turn::user("hi")).await.unwrap();
            let reminder = Reminder::new("u1", Utc::now(), "stir", "kitchen");
            stores.reminders.insert(&reminder).await.unwrap();
            if let Some(pool) = stores.pool {
                pool.close().await;
            }
        }

        let stores = open_stores(Some(&path)).await.unwrap();
        let session = stores.sessions.load("u1").await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 1);
        let pending = stores
            .reminders
            .list_by_status(ReminderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_open_stores_without_path_is_in_memory() {
        let stores = open_stores(None).await.unwrap();
        assert!(stores.pool.is_none());
        assert!(stores.sessions.list_ids().await.unwrap().is_empty());
    }
}
