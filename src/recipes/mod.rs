//! Mealie 菜谱管理服务客户端
//!
//! 只通过其公开 HTTP API 访问：菜谱搜索/导入/读取/笔记、膳食计划。
//! 读请求（GET）按 RetryPolicy 对瞬时错误退避重试；写请求只发一次。

pub mod client;
pub mod error;
pub mod types;

pub use client::MealieClient;
pub use error::RecipeError;
pub use types::{
    Ingredient, Instruction, MealPlanEntry, NamedRef, NewMealPlanEntry, Recipe, RecipeNote,
    RecipeSummary,
};
