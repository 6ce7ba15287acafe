//! 错误恢复引擎
//!
//! 根据 ToolError 类型返回 RecoveryAction，供编排循环决定是直接回复解释，还是把失败作为观察结果继续。

use crate::core::RecoveryAction;
use crate::tools::ToolError;

/// 语义化错误恢复：将工具错误映射为对话可见的解释
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ToolError) -> RecoveryAction {
        match err {
            ToolError::SchemaValidation { tool, violations } => RecoveryAction::Explain(format!(
                "I couldn't run `{tool}` because some details were missing or invalid ({}). \
                 Could you clarify what you'd like?",
                violations.join("; ")
            )),
            ToolError::UnknownTool(name) => RecoveryAction::Explain(format!(
                "I tried to use a tool called `{name}`, but I don't have it. \
                 Could you rephrase what you need?"
            )),
            ToolError::DuplicateToolName(name) => RecoveryAction::Explain(format!(
                "The tool `{name}` is misconfigured, so I can't use it right now."
            )),
            ToolError::Execution { tool, source } => {
                RecoveryAction::Observe(format!("error: `{tool}` failed: {source}"))
            }
            ToolError::Timeout(tool) => {
                RecoveryAction::Observe(format!("error: `{tool}` did not respond in time"))
            }
        }
    }
}
