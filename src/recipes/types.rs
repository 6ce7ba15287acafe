//! Mealie 数据类型（仅保留对话需要的字段；未知字段忽略）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamedRef {
    #[serde(default)]
    pub name: String,
}

/// 搜索结果中的菜谱摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSummary {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total_time: Option<String>,
    #[serde(default)]
    pub prep_time: Option<String>,
    #[serde(default)]
    pub perform_time: Option<String>,
    #[serde(default)]
    pub recipe_servings: Option<f64>,
    #[serde(default)]
    pub recipe_yield_quantity: Option<f64>,
    #[serde(default, rename = "orgURL")]
    pub org_url: Option<String>,
    #[serde(default)]
    pub recipe_category: Vec<NamedRef>,
    #[serde(default)]
    pub tags: Vec<NamedRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ingredient {
    #[serde(default)]
    pub display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Instruction {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecipeNote {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

/// 完整菜谱：配料、步骤、时间与笔记
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prep_time: Option<String>,
    #[serde(default)]
    pub perform_time: Option<String>,
    #[serde(default)]
    pub total_time: Option<String>,
    #[serde(default)]
    pub recipe_servings: Option<f64>,
    #[serde(default)]
    pub recipe_yield_quantity: Option<f64>,
    #[serde(default, rename = "orgURL")]
    pub org_url: Option<String>,
    #[serde(default)]
    pub recipe_ingredient: Vec<Ingredient>,
    #[serde(default)]
    pub recipe_instructions: Vec<Instruction>,
    #[serde(default)]
    pub notes: Vec<RecipeNote>,
}

/// 膳食计划条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanEntry {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub date: String,
    #[serde(default)]
    pub entry_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub recipe_id: Option<String>,
    #[serde(default)]
    pub recipe: Option<RecipeSummary>,
}

/// 新建膳食计划请求体；recipeId 与 title 至少其一
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMealPlanEntry {
    pub date: String,
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
