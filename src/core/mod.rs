//! 核心编排层：错误与恢复、重试、主控循环、运行时装配、优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod shutdown;

pub use builder::{create_llm_from_config, Runtime, RuntimeBuilder};
pub use error::{OrchestratorError, RecoveryAction, StoreError};
pub use orchestrator::{AssistantReply, Orchestrator, OrchestratorOptions, DEFAULT_PERSONA};
pub use recovery::RecoveryEngine;
pub use retry::{Attempted, RetryPolicy};
pub use shutdown::{
    PoolClose, SchedulerDrain, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
