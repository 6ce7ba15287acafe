//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：取最后一条 User 消息直接回复，不调用工具
//! - ScriptedLlmClient：按顺序吐出预设输出，并记录每次收到的消息，供编排测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, MessageRole};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("(offline) You said: {}", last_user))
    }
}

/// 脚本化客户端：每次 complete 弹出一条预设结果；脚本耗尽时返回 Unavailable
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(outputs.into_iter().map(|s| Ok(s.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条结果（可为错误）
    pub fn push(&self, output: Result<String, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(output);
    }

    /// 已收到的请求（每次 complete 一份完整消息列表）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let client = MockLlmClient;
        let out = client
            .complete(&[Message::system("sys"), Message::user("hello")])
            .await
            .unwrap();
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_unavailable() {
        let client = ScriptedLlmClient::new(["one", "two"]);
        assert_eq!(client.complete(&[]).await.unwrap(), "one");
        assert_eq!(client.complete(&[]).await.unwrap(), "two");
        assert!(matches!(
            client.complete(&[]).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(client.requests().len(), 3);
    }
}
