//! 编排器：单条用户消息的主控循环
//!
//! 加载（或创建）会话 -> 询问推理后端下一步 -> 执行工具并把结果作为 tool 轮次 -> 直到直接回复。
//! 本条消息产生的轮次先在本地暂存，得到回复后一次性原子写入；失败或取消的消息不留下任何轮次。
//! 等待推理后端或工具时不持有任何锁。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{OrchestratorError, RecoveryAction, RecoveryEngine};
use crate::llm::{parse_llm_output, LlmError, Message, NextAction, Planner};
use crate::session::{Role, Session, SessionStore, Turn};
use crate::tools::{ToolContext, ToolExecutor};

/// 内置人设（未找到 config/prompts/system.md 时使用）
pub const DEFAULT_PERSONA: &str = "You are Souschef, a warm and practical kitchen assistant. \
You help people find, import and cook recipes, plan meals and keep track of timers. \
Adapt explanations to the user's skill level and respect their dietary preferences. \
Keep answers short and concrete.";

const MALFORMED_HINT: &str = "Your previous reply looked like a tool call but was not valid JSON. \
Either reply to the user in plain text, or reply with exactly one JSON object of the form \
{\"tool\": \"<name>\", \"args\": {...}} and nothing else.";

/// 编排参数
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// 单条消息内允许的工具调用次数（maxToolHops）
    pub max_tool_hops: usize,
    /// 拼入请求的历史轮数
    pub max_history_turns: usize,
    /// 新会话的默认偏好
    pub default_preferences: BTreeMap<String, String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_tool_hops: 5,
            max_history_turns: 40,
            default_preferences: BTreeMap::new(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_tool_hops: cfg.orchestrator.max_tool_hops,
            max_history_turns: cfg.orchestrator.max_history_turns,
            default_preferences: cfg.session.default_preferences.clone(),
        }
    }
}

/// 一条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub reply: String,
    pub tool_calls_made: Vec<String>,
}

pub struct Orchestrator {
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    sessions: Arc<dyn SessionStore>,
    options: OrchestratorOptions,
    /// 注册表构建后不变，工具目录只生成一次
    tool_catalogue: String,
}

/// 会话轮次转为推理后端消息；工具结果以 user 消息回灌
fn turn_to_message(turn: &Turn) -> Message {
    match turn.role {
        Role::User => Message::user(turn.content.clone()),
        Role::Assistant => Message::assistant(turn.content.clone()),
        Role::Tool => Message::user(format!(
            "Tool result ({}): {}",
            turn.tool_name.as_deref().unwrap_or("unknown"),
            turn.content
        )),
    }
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        executor: ToolExecutor,
        sessions: Arc<dyn SessionStore>,
        options: OrchestratorOptions,
    ) -> Self {
        let tool_catalogue = executor.registry().to_schema_json();
        Self {
            planner,
            executor,
            recovery: RecoveryEngine::new(),
            sessions,
            options,
            tool_catalogue,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// 本条消息的 system prompt：人设 + 工具目录与调用协议 + 会话偏好
    pub fn build_system_prompt(&self, preferences: &BTreeMap<String, String>) -> String {
        let mut prompt = self.planner.base_system_prompt().to_string();

        if self.tool_catalogue != "[]" {
            prompt.push_str(
                "\n\n## Tools\n\
                 To use a tool, reply with only this JSON and nothing else: \
                 {\"tool\": \"<name>\", \"args\": {...}}\n\
                 After a tool result arrives you may call another tool or answer the user in plain text.\n\
                 ```json\n",
            );
            prompt.push_str(&self.tool_catalogue);
            prompt.push_str("\n```");
        }

        if !preferences.is_empty() {
            prompt.push_str("\n\n## User preferences\n");
            for (key, value) in preferences {
                prompt.push_str(&format!("- {key}: {value}\n"));
            }
        }
        prompt
    }

    async fn load_or_create(&self, session_id: &str) -> Result<Session, OrchestratorError> {
        if let Some(session) = self.sessions.load(session_id).await? {
            return Ok(session);
        }
        tracing::info!(session_id = %session_id, "creating session");
        Ok(self
            .sessions
            .create(session_id, self.options.default_preferences.clone())
            .await?)
    }

    /// 与 handle 相同，但在 cancel 触发时中止并返回 Cancelled（不写入任何轮次）
    pub async fn handle_with_cancel(
        &self,
        session_id: &str,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<AssistantReply, OrchestratorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %session_id, "message cancelled");
                Err(OrchestratorError::Cancelled)
            }
            result = self.handle(session_id, user_message) => result,
        }
    }

    pub async fn handle(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<AssistantReply, OrchestratorError> {
        let started = Instant::now();
        let session = self.load_or_create(session_id).await?;
        let system = self.build_system_prompt(&session.preferences);
        let history: Vec<Message> = session
            .recent_turns(self.options.max_history_turns)
            .iter()
            .map(turn_to_message)
            .collect();

        let ctx = ToolContext::new(session_id);
        let mut staged = vec![Turn::user(user_message)];
        let mut tool_calls_made = Vec::new();
        let mut hops = 0usize;
        let mut hint: Option<&str> = None;

        let reply = loop {
            let mut messages = history.clone();
            messages.extend(staged.iter().map(turn_to_message));
            if let Some(h) = hint.take() {
                messages.push(Message::system(h));
            }

            let raw = self
                .planner
                .plan_with_system(&messages, &system)
                .await
                .map_err(|e| {
                    tracing::warn!(session_id = %session_id, error = %e, "capability provider failed");
                    match e {
                        LlmError::Unavailable(reason) => OrchestratorError::CapabilityUnavailable(reason),
                        other => OrchestratorError::CapabilityUnavailable(other.to_string()),
                    }
                })?;

            let (name, args) = match parse_llm_output(&raw) {
                Ok(NextAction::DirectReply { text }) => break text,
                Ok(NextAction::ToolCall { name, args }) => (name, args),
                Err(malformed) => {
                    if hops >= self.options.max_tool_hops {
                        return Err(self.loop_exceeded(session_id, hops));
                    }
                    hops += 1;
                    tracing::debug!(session_id = %session_id, error = %malformed, "malformed tool call, asking again");
                    hint = Some(MALFORMED_HINT);
                    continue;
                }
            };

            if hops >= self.options.max_tool_hops {
                return Err(self.loop_exceeded(session_id, hops));
            }
            hops += 1;
            tool_calls_made.push(name.clone());

            match self.executor.execute(&ctx, &name, args).await {
                Ok(output) => staged.push(Turn::tool(&name, output.to_string())),
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::Explain(text) => {
                        tracing::info!(session_id = %session_id, tool = %name, error = %e, "tool call rejected");
                        break text;
                    }
                    RecoveryAction::Observe(text) => {
                        tracing::warn!(session_id = %session_id, tool = %name, error = %e, "tool call failed");
                        staged.push(Turn::tool(&name, text));
                    }
                },
            }
        };

        staged.push(Turn::assistant(reply.clone()));
        let turns = staged.len();
        self.sessions.append_turns(session_id, staged).await?;

        tracing::info!(
            session_id = %session_id,
            hops,
            turns,
            duration_ms = started.elapsed().as_millis() as u64,
            "message handled"
        );
        Ok(AssistantReply {
            reply,
            tool_calls_made,
        })
    }

    fn loop_exceeded(&self, session_id: &str, hops: usize) -> OrchestratorError {
        tracing::warn!(session_id = %session_id, hops, "tool loop exceeded, nothing committed");
        OrchestratorError::ToolLoopExceeded { hops }
    }
}
