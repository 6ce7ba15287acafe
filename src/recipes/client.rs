//! Mealie HTTP 客户端（Bearer 认证）

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::{MealPlanEntry, NewMealPlanEntry, Page, Recipe, RecipeNote, RecipeSummary};
use super::RecipeError;
use crate::core::RetryPolicy;

pub struct MealieClient {
    http: Client,
    base_url: String,
    api_key: String,
    read_policy: RetryPolicy,
}

fn check_slug(slug: &str) -> Result<&str, RecipeError> {
    let slug = slug.trim();
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(slug)
    } else {
        Err(RecipeError::InvalidInput(format!("not a recipe slug: {slug:?}")))
    }
}

impl MealieClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RecipeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecipeError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            read_policy: RetryPolicy::default(),
        })
    }

    /// 读请求的重试策略（写请求始终只发一次）
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
    }

    async fn send(req: RequestBuilder) -> Result<Response, RecipeError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(RecipeError::from_status(status, body))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RecipeError> {
        let attempted = self
            .read_policy
            .run(
                |attempt| async move {
                    if attempt > 1 {
                        tracing::debug!(path, attempt, "retrying Mealie read");
                    }
                    let resp = Self::send(self.request(Method::GET, path).query(query)).await?;
                    resp.json::<T>()
                        .await
                        .map_err(|e| RecipeError::Decode(e.to_string()))
                },
                RecipeError::is_transient,
            )
            .await;
        if let Err(e) = &attempted.result {
            tracing::warn!(path, attempts = attempted.attempts, error = %e, "Mealie read failed");
        }
        attempted.result
    }

    /// 按关键字搜索菜谱，可再按分类、标签（名称或 slug）过滤
    pub async fn search_recipes(
        &self,
        query: &str,
        categories: &[String],
        tags: &[String],
        per_page: u32,
    ) -> Result<Vec<RecipeSummary>, RecipeError> {
        let mut params = vec![("page", "1".to_string()), ("perPage", per_page.to_string())];
        let query = query.trim();
        if !query.is_empty() {
            params.push(("search", query.to_string()));
        }
        // 多值参数重复出现：categories=a&categories=b
        let filters = categories
            .iter()
            .map(|c| ("categories", c))
            .chain(tags.iter().map(|t| ("tags", t)));
        for (name, value) in filters {
            let value = value.trim();
            if !value.is_empty() {
                params.push((name, value.to_string()));
            }
        }
        let page: Page<RecipeSummary> = self.get_json("/api/recipes", &params).await?;
        Ok(page.items)
    }

    /// 从菜谱网页 URL 导入，返回新菜谱的 slug
    pub async fn import_from_url(&self, url: &str, include_tags: bool) -> Result<String, RecipeError> {
        let resp = Self::send(
            self.request(Method::POST, "/api/recipes/create/url")
                .json(&json!({ "include_tags": include_tags, "url": url })),
        )
        .await?;
        let slug = resp.text().await?;
        let slug = slug.trim().trim_matches('"').to_string();
        tracing::info!(slug = %slug, "recipe imported");
        Ok(slug)
    }

    pub async fn get_recipe(&self, slug: &str) -> Result<Recipe, RecipeError> {
        let slug = check_slug(slug)?;
        self.get_json(&format!("/api/recipes/{slug}"), &[]).await
    }

    /// 读取菜谱、追加笔记后 PATCH 回写，返回更新后的全部笔记
    pub async fn add_note(
        &self,
        slug: &str,
        title: &str,
        text: &str,
    ) -> Result<Vec<RecipeNote>, RecipeError> {
        let slug = check_slug(slug)?;
        let recipe = self.get_recipe(slug).await?;
        let mut notes = recipe.notes;
        notes.push(RecipeNote {
            title: title.to_string(),
            text: text.to_string(),
        });

        let resp = Self::send(
            self.request(Method::PATCH, &format!("/api/recipes/{slug}"))
                .json(&json!({ "notes": notes })),
        )
        .await?;
        let updated: Recipe = resp
            .json()
            .await
            .map_err(|e| RecipeError::Decode(e.to_string()))?;
        Ok(updated.notes)
    }

    pub async fn todays_mealplan(&self) -> Result<Vec<MealPlanEntry>, RecipeError> {
        self.get_json("/api/households/mealplans/today", &[]).await
    }

    /// 日期区间内的膳食计划（YYYY-MM-DD）
    pub async fn mealplans(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<MealPlanEntry>, RecipeError> {
        let mut params = vec![("page", "1".to_string()), ("perPage", "50".to_string())];
        if let Some(start) = start_date {
            params.push(("startDate", start.to_string()));
        }
        if let Some(end) = end_date {
            params.push(("endDate", end.to_string()));
        }
        let page: Page<MealPlanEntry> = self.get_json("/api/households/mealplans", &params).await?;
        Ok(page.items)
    }

    pub async fn create_mealplan(&self, entry: &NewMealPlanEntry) -> Result<MealPlanEntry, RecipeError> {
        if entry.recipe_id.is_none() && entry.title.is_none() {
            return Err(RecipeError::InvalidInput(
                "either recipe_id or title must be provided".to_string(),
            ));
        }
        let resp = Self::send(self.request(Method::POST, "/api/households/mealplans").json(entry)).await?;
        tracing::info!(date = %entry.date, entry_type = %entry.entry_type, "mealplan entry created");
        resp.json()
            .await
            .map_err(|e| RecipeError::Decode(e.to_string()))
    }
}
