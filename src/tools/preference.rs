//! 偏好工具：把用户偏好（饮食、技能水平、通知 topic 等）写入当前会话

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::session::SessionStore;
use crate::tools::{Tool, ToolContext};

pub struct PreferenceSetTool {
    sessions: Arc<dyn SessionStore>,
}

impl PreferenceSetTool {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PreferenceSetInput {
    /// e.g. "diet", "skill", "allergies", "ntfy_topic"
    #[schemars(length(min = 1, max = 64))]
    pub key: String,
    #[schemars(length(max = 500))]
    pub value: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PreferenceSetOutput {
    pub key: String,
    pub value: String,
}

#[async_trait]
impl Tool for PreferenceSetTool {
    type Input = PreferenceSetInput;
    type Output = PreferenceSetOutput;

    fn name(&self) -> &str {
        "preference_set"
    }

    fn description(&self) -> &str {
        "Remember a preference for this user (diet, skill level, allergies, notification topic)."
    }

    async fn call(&self, ctx: &ToolContext, input: PreferenceSetInput) -> anyhow::Result<PreferenceSetOutput> {
        let key = input.key.trim().to_lowercase();
        let value = input.value.trim().to_string();
        self.sessions
            .set_preference(&ctx.session_id, &key, &value)
            .await?;
        tracing::info!(session_id = %ctx.session_id, key = %key, "preference stored");
        Ok(PreferenceSetOutput { key, value })
    }
}
