//! Souschef - 厨房助手编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排循环、错误与恢复、重试、运行时装配、优雅关闭
//! - **llm**: 推理后端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与输出解析
//! - **recipes**: Mealie 食谱与餐单客户端
//! - **reminders**: 提醒模型、存储、调度与 ntfy 投递
//! - **session**: 会话轮次与偏好（内存 / SQLite）
//! - **storage**: 共享 SQLite 连接池
//! - **tools**: 工具注册表、参数校验、执行器与厨房工具
//! - **server**: HTTP 入口（feature `http`）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod recipes;
pub mod reminders;
pub mod session;
pub mod storage;
pub mod tools;

#[cfg(feature = "http")]
pub mod server;
