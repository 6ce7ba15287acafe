//! 运行时构建器：统一的组件初始化逻辑
//!
//! HTTP 入口与集成测试共用同一套装配：存储 -> 推理后端 -> 投递 -> 调度 -> 工具注册表 -> 编排器。
//! 依赖外部服务的工具只在对应配置齐全时注册。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::core::orchestrator::{Orchestrator, OrchestratorOptions, DEFAULT_PERSONA};
use crate::core::RetryPolicy;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, Planner};
use crate::recipes::MealieClient;
use crate::reminders::{Dispatcher, Notifier, NtfyNotifier, ReminderScheduler, ReminderStore};
use crate::session::SessionStore;
use crate::storage::open_stores;
use crate::tools::{
    MealPlanCreateBulkTool, MealPlanCreateTool, MealPlanListTool, MealPlanTodayTool, PreferenceSetTool,
    RecipeAddNoteTool, RecipeGetTool, RecipeImportTool, RecipeSearchTool, ReminderCreateTool,
    ToolExecutor, ToolRegistry, WebSearchTool,
};

/// 按配置选择推理后端；没有可用密钥时退回离线 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    let api_key = cfg.llm_api_key();

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("using offline mock capability provider");
            Arc::new(MockLlmClient)
        }
        ("deepseek", Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "using DeepSeek capability provider");
            Arc::new(
                create_deepseek_client(Some(cfg.llm.model.as_str()), Some(key.as_str()))
                    .with_timeout(timeout),
            )
        }
        ("openai", Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "using OpenAI-compatible capability provider");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(key.as_str()))
                    .with_timeout(timeout),
            )
        }
        (other, _) => {
            tracing::warn!(provider = %other, "no API key set or provider unknown, using mock capability provider");
            Arc::new(MockLlmClient)
        }
    }
}

/// 读取人设：配置路径 -> config/prompts/system.md -> 内置
fn load_system_prompt(cfg: &AppConfig) -> String {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = &cfg.app.system_prompt_path {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("config/prompts/system.md"));
    candidates.push(PathBuf::from("../config/prompts/system.md"));

    candidates
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_PERSONA.to_string())
}

/// 构建完成的运行时；各组件可被多个请求共享
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<dyn SessionStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub scheduler: Arc<ReminderScheduler>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ToolRegistry>,
    /// 持久化模式下的连接池，关闭时 close
    pub pool: Option<SqlitePool>,
    pub config: AppConfig,
}

pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    notifier: Option<Arc<dyn Notifier>>,
    system_prompt: Option<String>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            notifier: None,
            system_prompt: None,
        }
    }

    /// 替换推理后端（测试用脚本化客户端）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_mealie(&self) -> anyhow::Result<Option<Arc<MealieClient>>> {
        let (Some(base_url), Some(api_key)) =
            (self.config.mealie_base_url(), self.config.mealie_api_key())
        else {
            tracing::info!("recipe service not configured, recipe and meal plan tools disabled");
            return Ok(None);
        };
        let read_policy = RetryPolicy::new(
            self.config.recipes.read_attempts,
            Duration::from_millis(self.config.dispatcher.base_delay_ms),
            Duration::from_millis(self.config.dispatcher.max_delay_ms),
        );
        let client = MealieClient::new(
            &base_url,
            &api_key,
            Duration::from_secs(self.config.recipes.timeout_secs),
        )
        .context("failed to build recipe service client")?
        .with_read_policy(read_policy);
        Ok(Some(Arc::new(client)))
    }

    /// 工具注册表：会话偏好与提醒总是可用，外部服务工具按配置启用
    pub fn build_tool_registry(
        &self,
        sessions: Arc<dyn SessionStore>,
        scheduler: Arc<ReminderScheduler>,
    ) -> anyhow::Result<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register_tool(PreferenceSetTool::new(sessions))?;
        tools.register_tool(ReminderCreateTool::new(scheduler))?;

        if let Some(mealie) = self.build_mealie()? {
            tools.register_tool(RecipeSearchTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(RecipeImportTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(RecipeGetTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(RecipeAddNoteTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(MealPlanTodayTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(MealPlanListTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(MealPlanCreateTool::new(Arc::clone(&mealie)))?;
            tools.register_tool(MealPlanCreateBulkTool::new(mealie))?;
        }

        let search = &self.config.tools.search;
        match self.config.search_api_key() {
            Some(key) => tools.register_tool(WebSearchTool::new(
                &search.endpoint,
                &key,
                search.timeout_secs,
                search.max_result_chars,
            ))?,
            None => tracing::info!("no search API key, web_search disabled"),
        }

        Ok(tools)
    }

    pub async fn build(self) -> anyhow::Result<Runtime> {
        let cfg = &self.config;
        let stores = open_stores(cfg.storage.db_path.as_deref())
            .await
            .context("failed to open storage")?;

        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(cfg));
        let notifier: Arc<dyn Notifier> = match self.notifier.clone() {
            Some(notifier) => notifier,
            None => Arc::new(
                NtfyNotifier::new(
                    &cfg.notify.base_url,
                    cfg.ntfy_token(),
                    Duration::from_secs(cfg.notify.timeout_secs),
                )
                .context("failed to build notification client")?,
            ),
        };

        let delivery_policy = RetryPolicy::new(
            cfg.dispatcher.retry_cap,
            Duration::from_millis(cfg.dispatcher.base_delay_ms),
            Duration::from_millis(cfg.dispatcher.max_delay_ms),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            notifier,
            Arc::clone(&stores.reminders),
            delivery_policy,
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::clone(&stores.reminders),
            Arc::clone(&stores.sessions),
            Arc::clone(&dispatcher),
            Duration::from_millis(cfg.scheduler.poll_interval_ms),
            cfg.notify.default_topic.clone(),
        ));

        let registry = Arc::new(
            self.build_tool_registry(Arc::clone(&stores.sessions), Arc::clone(&scheduler))?,
        );
        tracing::info!(tools = ?registry.tool_names(), "tool registry ready");

        let persona = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| load_system_prompt(cfg));
        let executor = ToolExecutor::new(
            Arc::clone(&registry),
            Duration::from_secs(cfg.tools.tool_timeout_secs),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Planner::new(llm, persona),
            executor,
            Arc::clone(&stores.sessions),
            OrchestratorOptions::from_config(cfg),
        ));

        Ok(Runtime {
            orchestrator,
            sessions: stores.sessions,
            reminders: stores.reminders,
            scheduler,
            dispatcher,
            registry,
            pool: stores.pool,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::reminders::RecordingNotifier;

    fn offline_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.storage.db_path = None;
        cfg.llm.provider = "mock".to_string();
        cfg.recipes.base_url = None;
        cfg.recipes.api_key = None;
        cfg.tools.search.api_key = None;
        cfg
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let llm = create_llm_from_config(&offline_config());
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_build_registers_core_tools() {
        let runtime = RuntimeBuilder::new(offline_config())
            .with_llm(Arc::new(ScriptedLlmClient::new(["hello"])))
            .with_notifier(Arc::new(RecordingNotifier::new()))
            .with_system_prompt("test persona")
            .build()
            .await
            .unwrap();

        let names = runtime.registry.tool_names();
        assert!(names.contains(&"preference_set".to_string()));
        assert!(names.contains(&"reminder_create".to_string()));
        assert!(runtime.pool.is_none());

        let reply = runtime.orchestrator.handle("u1", "hi").await.unwrap();
        assert_eq!(reply.reply, "hello");
    }

    #[tokio::test]
    async fn test_recipe_tools_follow_configuration() {
        let mut cfg = offline_config();
        cfg.recipes.base_url = Some("http://mealie.local:9000".to_string());
        cfg.recipes.api_key = Some("token".to_string());

        let builder = RuntimeBuilder::new(cfg)
            .with_llm(Arc::new(ScriptedLlmClient::new(["ok"])))
            .with_notifier(Arc::new(RecordingNotifier::new()));
        let runtime = builder.build().await.unwrap();

        let names = runtime.registry.tool_names();
        for expected in [
            "recipe_search",
            "recipe_import",
            "recipe_get",
            "recipe_add_note",
            "mealplan_today",
            "mealplan_list",
            "mealplan_create",
            "mealplan_create_bulk",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_build_with_default_ntfy_notifier() {
        let runtime = RuntimeBuilder::new(offline_config())
            .with_llm(Arc::new(ScriptedLlmClient::new(["ok"])))
            .build()
            .await
            .unwrap();
        assert!(runtime.registry.tool_names().contains(&"reminder_create".to_string()));
    }
}
