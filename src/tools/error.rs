//! 工具层错误
//!
//! 注册（重名）、解析（未知工具）、参数校验、执行失败与超时。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Duplicate tool name: {0}")]
    DuplicateToolName(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {}", violations.join("; "))]
    SchemaValidation {
        tool: String,
        violations: Vec<String>,
    },

    #[error("Tool {tool} failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Execution {
            tool: tool.into(),
            source: source.into(),
        }
    }

    /// 参数错误类（ValidationError）：本地恢复，回复澄清信息
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::SchemaValidation { .. } | Self::UnknownTool(_))
    }
}
