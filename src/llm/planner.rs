//! Planner：下一步动作规划与 Tool Call 解析
//!
//! 推理后端返回纯文本或 JSON Tool Call（`{"tool": "...", "args": {...}}`）；
//! parse_llm_output 从文本中提取 JSON 并解析为 NextAction。

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{LlmClient, LlmError, Message};

/// 推理后端给出的下一步动作
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// 直接回复用户
    DirectReply { text: String },
    /// 需要执行工具
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
}

/// 输出看起来是 Tool Call 但无法解析
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed tool call: {0}")]
pub struct MalformedOutput(pub String);

#[derive(Deserialize)]
struct RawToolCall {
    tool: String,
    #[serde(default = "empty_args")]
    args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// 解析 LLM 输出：含有效 JSON 且 tool 非空为 ToolCall；不含 "tool" 键的文本为直接回复
pub fn parse_llm_output(output: &str) -> Result<NextAction, MalformedOutput> {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Ok(NextAction::DirectReply {
            text: trimmed.to_string(),
        });
    };

    match serde_json::from_str::<RawToolCall>(json_str) {
        Ok(call) if call.tool.trim().is_empty() => Ok(NextAction::DirectReply {
            text: trimmed.to_string(),
        }),
        Ok(call) => Ok(NextAction::ToolCall {
            name: call.tool,
            args: call.args,
        }),
        // 普通回复里出现花括号（如温度、模板）不算工具调用
        Err(_) if !json_str.contains("\"tool\"") => Ok(NextAction::DirectReply {
            text: trimmed.to_string(),
        }),
        Err(e) => Err(MalformedOutput(format!("{}: {}", e, json_str))),
    }
}

/// Planner：持有 LLM 与基础 system prompt；每次请求前拼接动态 system
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 使用动态拼接的 system（工具目录、偏好等）调用 LLM
    pub async fn plan_with_system(
        &self,
        messages: &[Message],
        system: &str,
    ) -> Result<String, LlmError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(system.to_string()));
        full_messages.extend_from_slice(messages);
        self.llm.complete(&full_messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_text_is_reply() {
        let action = parse_llm_output("Try a leek and potato soup.").unwrap();
        assert_eq!(
            action,
            NextAction::DirectReply {
                text: "Try a leek and potato soup.".to_string()
            }
        );
    }

    #[test]
    fn test_parse_bare_json_tool_call() {
        let action =
            parse_llm_output(r#"{"tool": "recipe_search", "args": {"query": "soup"}}"#).unwrap();
        assert_eq!(
            action,
            NextAction::ToolCall {
                name: "recipe_search".to_string(),
                args: json!({"query": "soup"}),
            }
        );
    }

    #[test]
    fn test_parse_fenced_json_with_surrounding_text() {
        let output = "Let me look that up.\n```json\n{\"tool\": \"mealplan_today\"}\n```";
        match parse_llm_output(output).unwrap() {
            NextAction::ToolCall { name, args } => {
                assert_eq!(name, "mealplan_today");
                assert_eq!(args, json!({}));
            }
            other => panic!("Expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_braces_without_tool_key_is_reply() {
        let action = parse_llm_output("Fill the {dough} cavity and bake.").unwrap();
        assert!(matches!(action, NextAction::DirectReply { .. }));
    }

    #[test]
    fn test_parse_broken_tool_json_is_malformed() {
        let err = parse_llm_output(r#"{"tool": "recipe_get", "args": {"slug": }"#).unwrap_err();
        assert!(err.0.contains("recipe_get"));
    }

    #[test]
    fn test_parse_empty_tool_name_is_reply() {
        let action = parse_llm_output(r#"{"tool": "", "args": {}}"#).unwrap();
        assert!(matches!(action, NextAction::DirectReply { .. }));
    }
}
