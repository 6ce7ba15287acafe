//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与 Planner

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod planner;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use planner::{parse_llm_output, MalformedOutput, NextAction, Planner};
pub use traits::{LlmClient, LlmError, Message, MessageRole};
