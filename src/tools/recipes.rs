//! 菜谱工具：搜索、URL 导入、读取、追加笔记（均通过 Mealie）

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::recipes::{MealieClient, Recipe, RecipeError, RecipeNote, RecipeSummary};
use crate::tools::{InvalidArguments, Tool, ToolContext};

const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// 本地可判定的输入错误按参数错误上报，其余保持原因链
pub(crate) fn recipe_failure(e: RecipeError) -> anyhow::Error {
    match e {
        RecipeError::InvalidInput(reason) => InvalidArguments::new(reason).into(),
        other => other.into(),
    }
}

pub struct RecipeSearchTool {
    client: Arc<MealieClient>,
}

impl RecipeSearchTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipeSearchInput {
    /// Search text, e.g. "chicken soup"
    #[schemars(length(min = 1))]
    pub query: String,
    /// Only recipes in all of these categories (names or slugs)
    #[serde(default)]
    pub categories: Vec<String>,
    /// Only recipes carrying all of these tags (names or slugs)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Maximum number of recipes to return (default 5)
    #[schemars(range(min = 1, max = 50))]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RecipeSearchOutput {
    pub count: usize,
    pub recipes: Vec<RecipeSummary>,
}

#[async_trait]
impl Tool for RecipeSearchTool {
    type Input = RecipeSearchInput;
    type Output = RecipeSearchOutput;

    fn name(&self) -> &str {
        "recipe_search"
    }

    fn description(&self) -> &str {
        "Search the household recipe collection by keyword, optionally filtered by categories and tags. Returns names, slugs, times and tags."
    }

    async fn call(&self, _ctx: &ToolContext, input: RecipeSearchInput) -> anyhow::Result<RecipeSearchOutput> {
        let limit = input.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let recipes = self
            .client
            .search_recipes(&input.query, &input.categories, &input.tags, limit)
            .await
            .map_err(recipe_failure)?;
        Ok(RecipeSearchOutput {
            count: recipes.len(),
            recipes,
        })
    }
}

pub struct RecipeImportTool {
    client: Arc<MealieClient>,
}

impl RecipeImportTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipeImportInput {
    /// Web page containing the recipe
    #[schemars(length(min = 1))]
    pub url: String,
    /// Keep the site's tags on the imported recipe
    pub include_tags: Option<bool>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RecipeImportOutput {
    /// Slug of the new recipe, usable with recipe_get and recipe_add_note
    pub slug: String,
}

#[async_trait]
impl Tool for RecipeImportTool {
    type Input = RecipeImportInput;
    type Output = RecipeImportOutput;

    fn name(&self) -> &str {
        "recipe_import"
    }

    fn description(&self) -> &str {
        "Import a recipe into the collection from a cooking website URL. Returns the new recipe slug."
    }

    async fn call(&self, _ctx: &ToolContext, input: RecipeImportInput) -> anyhow::Result<RecipeImportOutput> {
        let url = input.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(InvalidArguments::new(format!("not a web address: {url}")).into());
        }
        let slug = self
            .client
            .import_from_url(url, input.include_tags.unwrap_or(false))
            .await
            .map_err(recipe_failure)?;
        Ok(RecipeImportOutput { slug })
    }
}

pub struct RecipeGetTool {
    client: Arc<MealieClient>,
}

impl RecipeGetTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipeGetInput {
    #[schemars(length(min = 1))]
    pub slug: String,
}

#[async_trait]
impl Tool for RecipeGetTool {
    type Input = RecipeGetInput;
    type Output = Recipe;

    fn name(&self) -> &str {
        "recipe_get"
    }

    fn description(&self) -> &str {
        "Get a full recipe by slug: ingredients, instructions, times, servings and notes."
    }

    async fn call(&self, _ctx: &ToolContext, input: RecipeGetInput) -> anyhow::Result<Recipe> {
        self.client
            .get_recipe(&input.slug)
            .await
            .map_err(recipe_failure)
    }
}

pub struct RecipeAddNoteTool {
    client: Arc<MealieClient>,
}

impl RecipeAddNoteTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipeAddNoteInput {
    #[schemars(length(min = 1))]
    pub slug: String,
    #[schemars(length(min = 1))]
    pub title: String,
    #[schemars(length(min = 1))]
    pub text: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RecipeAddNoteOutput {
    pub notes: Vec<RecipeNote>,
}

#[async_trait]
impl Tool for RecipeAddNoteTool {
    type Input = RecipeAddNoteInput;
    type Output = RecipeAddNoteOutput;

    fn name(&self) -> &str {
        "recipe_add_note"
    }

    fn description(&self) -> &str {
        "Append a note (tips, substitutions, how it turned out) to a recipe."
    }

    async fn call(&self, _ctx: &ToolContext, input: RecipeAddNoteInput) -> anyhow::Result<RecipeAddNoteOutput> {
        let notes = self
            .client
            .add_note(&input.slug, &input.title, &input.text)
            .await
            .map_err(recipe_failure)?;
        Ok(RecipeAddNoteOutput { notes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolRegistry};
    use serde_json::json;
    use std::time::Duration;

    fn registry(url: &str) -> ToolRegistry {
        let client = Arc::new(MealieClient::new(url, "k", Duration::from_secs(5)).unwrap());
        let mut registry = ToolRegistry::new();
        registry.register_tool(RecipeSearchTool::new(client.clone())).unwrap();
        registry.register_tool(RecipeImportTool::new(client.clone())).unwrap();
        registry.register_tool(RecipeGetTool::new(client)).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_search_defaults_limit_to_five() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/recipes")
            .match_query(mockito::Matcher::UrlEncoded("perPage".into(), "5".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"name":"Miso Soup","slug":"miso-soup"}]}"#)
            .create_async()
            .await;

        let out = registry(&server.url())
            .invoke(&ToolContext::new("u1"), "recipe_search", json!({"query": "soup"}))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out["count"], 1);
        assert_eq!(out["recipes"][0]["name"], "Miso Soup");
    }

    #[tokio::test]
    async fn test_search_limit_out_of_range_is_rejected() {
        let err = registry("http://127.0.0.1:9")
            .invoke(
                &ToolContext::new("u1"),
                "recipe_search",
                json!({"query": "soup", "limit": 500}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SchemaValidation { .. }));
    }

    #[tokio::test]
    async fn test_import_rejects_non_web_url() {
        let err = registry("http://127.0.0.1:9")
            .invoke(
                &ToolContext::new("u1"),
                "recipe_import",
                json!({"url": "file:///etc/passwd"}),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_get_unavailable_is_execution_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/recipes/miso-soup")
            .with_status(404)
            .create_async()
            .await;

        let err = registry(&server.url())
            .invoke(&ToolContext::new("u1"), "recipe_get", json!({"slug": "miso-soup"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }
}
