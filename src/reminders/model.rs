//! 提醒数据模型与状态机
//!
//! pending → fired（调度器触发）→ delivered | failed（投递结果）；delivered / failed 为终态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Fired,
    Delivered,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fired => "fired",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fired" => Some(Self::Fired),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    /// 创建时必须存在的会话（引用，不拥有）
    pub session_id: String,
    pub due_at: DateTime<Utc>,
    pub message: String,
    /// 通知代理的 topic
    pub topic: String,
    pub status: ReminderStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(
        session_id: impl Into<String>,
        due_at: DateTime<Utc>,
        message: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        // 存储精度为毫秒
        let due_at = DateTime::<Utc>::from_timestamp_millis(due_at.timestamp_millis()).unwrap_or(due_at);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            due_at,
            message: message.into(),
            topic: topic.into(),
            status: ReminderStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 一次比较并交换的状态变更：仅当当前状态为 from 时生效
#[derive(Clone, Debug)]
pub struct Transition {
    pub from: ReminderStatus,
    pub to: ReminderStatus,
    pub attempts: Option<u32>,
    pub last_error: Option<String>,
}

impl Transition {
    pub fn new(from: ReminderStatus, to: ReminderStatus) -> Self {
        Self {
            from,
            to,
            attempts: None,
            last_error: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}
