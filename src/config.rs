//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SOUSCHEF__*` 覆盖（双下划线表示嵌套，如 `SOUSCHEF__LLM__MODEL=deepseek-chat`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub session: SessionSection,
    pub scheduler: SchedulerSection,
    pub dispatcher: DispatcherSection,
    pub recipes: RecipesSection,
    pub notify: NotifySection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

/// [app] 段：应用名、系统提示词路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 系统提示词文件，未设置时依次查找 config/prompts/system.md
    pub system_prompt_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 推理模型（capabilityModel）
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：单条消息内工具调用跳数上限（maxToolHops）
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_tool_hops")]
    pub max_tool_hops: usize,
    /// 拼入 prompt 的历史轮数上限
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_tool_hops: default_max_tool_hops(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_max_tool_hops() -> usize {
    5
}

fn default_max_history_turns() -> usize {
    40
}

/// [session] 段：新会话的默认偏好
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionSection {
    #[serde(default)]
    pub default_preferences: BTreeMap<String, String>,
}

/// [scheduler] 段：提醒轮询精度（pollIntervalMs）
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// [dispatcher] 段：投递重试上限（retryCap）与退避参数
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            retry_cap: default_retry_cap(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_retry_cap() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

/// [recipes] 段：Mealie 地址、密钥、超时与读请求重试次数
#[derive(Debug, Clone, Deserialize)]
pub struct RecipesSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_recipes_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
}

impl Default for RecipesSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_recipes_timeout_secs(),
            read_attempts: default_read_attempts(),
        }
    }
}

fn default_recipes_timeout_secs() -> u64 {
    30
}

fn default_read_attempts() -> u32 {
    3
}

/// [notify] 段：ntfy 地址、默认 topic、访问令牌
#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    #[serde(default = "default_ntfy_url")]
    pub base_url: String,
    #[serde(default = "default_topic")]
    pub default_topic: String,
    pub token: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            base_url: default_ntfy_url(),
            default_topic: default_topic(),
            token: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_ntfy_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_topic() -> String {
    "souschef".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

/// [tools] 段：工具超时与搜索
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.search] 段：搜索 API 地址与密钥（searchApiKey）；未配置密钥时不注册 web_search
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key: None,
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    4000
}

/// [storage] 段：SQLite 文件路径；未设置时使用内存存储（重启后丢失）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    pub db_path: Option<PathBuf>,
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl AppConfig {
    /// 读取 API Key：配置优先，其次环境变量
    pub fn llm_api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn mealie_api_key(&self) -> Option<String> {
        self.recipes
            .api_key
            .clone()
            .or_else(|| std::env::var("MEALIE_API_KEY").ok())
    }

    pub fn mealie_base_url(&self) -> Option<String> {
        self.recipes
            .base_url
            .clone()
            .or_else(|| std::env::var("MEALIE_BASE_URL").ok())
    }

    pub fn ntfy_token(&self) -> Option<String> {
        self.notify
            .token
            .clone()
            .or_else(|| std::env::var("NTFY_TOKEN").ok())
    }

    pub fn search_api_key(&self) -> Option<String> {
        self.tools
            .search
            .api_key
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
    }
}

/// 从 config 目录加载配置，环境变量 SOUSCHEF__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SOUSCHEF__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SOUSCHEF")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
