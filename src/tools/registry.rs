//! 工具注册表
//!
//! 每个工具以 ToolDescriptor 注册：唯一名称、描述、输入/输出 JSON Schema 与处理器。
//! 注册表在启动时构建一次，之后以 Arc<ToolRegistry> 只读共享，查找无需加锁。
//! invoke 先按 input_schema 校验参数，校验失败时处理器不会被调用。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::gen::SchemaGenerator;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::schema::validate;
use super::ToolError;

/// 调用上下文：显式传递会话 id，工具不读取任何全局"当前会话"
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

/// 处理器返回该错误时按参数错误处理（SchemaValidation），而非执行失败
#[derive(Error, Debug)]
#[error("{0}")]
pub struct InvalidArguments(pub String);

impl InvalidArguments {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// 无类型处理器：JSON 进，JSON 出
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, ctx: &ToolContext, args: Value) -> anyhow::Result<Value>;
}

/// 带类型的工具：输入/输出类型同时决定 Schema 与反序列化
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send;
    type Output: Serialize + JsonSchema + Send;

    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    async fn call(&self, ctx: &ToolContext, input: Self::Input) -> anyhow::Result<Self::Output>;
}

struct TypedHandler<T>(T);

#[async_trait]
impl<T: Tool> ToolHandler for TypedHandler<T> {
    async fn invoke(&self, ctx: &ToolContext, args: Value) -> anyhow::Result<Value> {
        let input: T::Input =
            serde_json::from_value(args).map_err(|e| InvalidArguments::new(e.to_string()))?;
        let output = self.0.call(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

fn schema_of<S: JsonSchema>() -> Value {
    let root = SchemaGenerator::default().into_root_schema_for::<S>();
    serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({}))
}

/// 工具描述符：注册后不可变
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn from_tool<T: Tool>(tool: T) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: schema_of::<T::Input>(),
            output_schema: schema_of::<T::Output>(),
            handler: Arc::new(TypedHandler(tool)),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// 工具注册表：按名称存储描述符（有序，保证 prompt 中工具目录稳定）
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateToolName(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "tool registered");
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn register_tool<T: Tool>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register(ToolDescriptor::from_tool(tool))
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// 校验参数后调用处理器
    pub async fn invoke(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let descriptor = self.resolve(name)?;

        let violations = validate(&descriptor.input_schema, &args);
        if !violations.is_empty() {
            return Err(ToolError::SchemaValidation {
                tool: name.to_string(),
                violations,
            });
        }

        descriptor
            .handler
            .invoke(ctx, args)
            .await
            .map_err(|e| match e.downcast::<InvalidArguments>() {
                Ok(invalid) => ToolError::SchemaValidation {
                    tool: name.to_string(),
                    violations: vec![invalid.0],
                },
                Err(e) => ToolError::execution(name, e),
            })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具目录 JSON（name / description / parameters），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .values()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.input_schema,
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
