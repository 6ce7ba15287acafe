//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：工具层错误被翻译为对话内解释（Explain）或观察记录（Observe），
//! 只有推理后端不可用与存储失败作为硬错误返回给调用方。

use thiserror::Error;

/// 存储层错误（会话与提醒共用）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Reminder not found: {0}")]
    ReminderNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 单条消息编排过程中返回给调用方的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 推理后端不可达；不静默重试，直接交给调用方
    #[error("Capability provider unavailable: {0}")]
    CapabilityUnavailable(String),

    /// 工具调用跳数超过上限；仅本条消息失败，会话状态保持不变
    #[error("Tool loop exceeded after {hops} tool calls")]
    ToolLoopExceeded { hops: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Request cancelled")]
    Cancelled,
}

/// 恢复引擎根据工具错误给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以该文本作为本条消息的最终回复（参数不合法、未知工具）
    Explain(String),
    /// 将该文本作为工具结果写入对话，继续询问推理后端（执行失败、超时）
    Observe(String),
}
