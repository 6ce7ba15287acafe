//! 会话存储抽象层
//!
//! 统一的会话状态接口，支持内存和 SQLite 持久化两种实现。
//! 同一会话的写操作经 SessionLocks 串行化；不同会话互不阻塞。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use super::model::{Session, Turn};
use crate::core::StoreError;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取会话；不存在时返回 None
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// 若不存在则以给定偏好创建，返回当前会话
    async fn create(
        &self,
        id: &str,
        preferences: BTreeMap<String, String>,
    ) -> Result<Session, StoreError>;

    /// 追加单个轮次，返回前已落盘
    async fn append_turn(&self, id: &str, turn: Turn) -> Result<(), StoreError> {
        self.append_turns(id, vec![turn]).await
    }

    /// 原子追加一批轮次：要么全部可见，要么全部不可见
    async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<(), StoreError>;

    async fn set_preference(&self, id: &str, key: &str, value: &str) -> Result<(), StoreError>;

    /// 删除会话及其全部轮次与偏好；返回会话此前是否存在
    async fn reset(&self, id: &str) -> Result<bool, StoreError>;

    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// 每会话互斥锁表。表本身的锁只在查找条目时短暂持有，不跨 await。
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// reset 之后丢弃条目，避免锁表无限增长
    pub fn forget(&self, id: &str) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = map.get(id) {
            // 仅当没有其他持有者时移除
            if Arc::strong_count(lock) == 1 {
                map.remove(id);
            }
        }
    }
}

/// 内存会话存储（测试或无需持久化的部署）
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    locks: SessionLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(
        &self,
        id: &str,
        preferences: BTreeMap<String, String>,
    ) -> Result<Session, StoreError> {
        let _guard = self.locks.acquire(id).await;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, preferences));
        Ok(session.clone())
    }

    async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<(), StoreError> {
        let _guard = self.locks.acquire(id).await;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        session.turns.extend(turns);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn set_preference(&self, id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.locks.acquire(id).await;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        session.preferences.insert(key.to_string(), value.to_string());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<bool, StoreError> {
        let existed = {
            let _guard = self.locks.acquire(id).await;
            self.sessions.write().await.remove(id).is_some()
        };
        self.locks.forget(id);
        Ok(existed)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
