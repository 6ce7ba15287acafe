//! Web 搜索工具（Tavily 兼容 API）：POST {endpoint}，Bearer 密钥，结果大小受 max_result_chars 限制
//!
//! 仅在配置了搜索 API Key 时注册。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::tools::{Tool, ToolContext};

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: &str, api_key: &str, timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            max_result_chars,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WebSearchInput {
    #[schemars(length(min = 1))]
    pub query: String,
    /// Default 5
    #[schemars(range(min = 1, max = 10))]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WebSearchOutput {
    pub results: Vec<SearchHit>,
    /// Snippets were shortened to fit the size limit
    pub truncated: bool,
}

/// 按总字符预算截断摘要
fn fit_to_budget(hits: Vec<SearchHit>, budget: usize) -> (Vec<SearchHit>, bool) {
    let mut remaining = budget;
    let mut truncated = false;
    let mut out = Vec::with_capacity(hits.len());
    for mut hit in hits {
        if remaining == 0 {
            truncated = true;
            break;
        }
        let len = hit.snippet.chars().count();
        if len > remaining {
            hit.snippet = hit.snippet.chars().take(remaining).collect::<String>() + "...[truncated]";
            truncated = true;
            remaining = 0;
        } else {
            remaining -= len;
        }
        out.push(hit);
    }
    (out, truncated)
}

#[async_trait]
impl Tool for WebSearchTool {
    type Input = WebSearchInput;
    type Output = WebSearchOutput;

    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for recipes, techniques or ingredient facts. Returns titles, URLs and snippets."
    }

    async fn call(&self, _ctx: &ToolContext, input: WebSearchInput) -> anyhow::Result<WebSearchOutput> {
        tracing::info!(query = %input.query, "web search");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": input.query,
                "max_results": input.max_results.unwrap_or(5),
                "search_depth": "basic",
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("search API returned HTTP {}: {}", status.as_u16(), body);
        }
        let parsed: SearchResponse = resp.json().await?;
        let (results, truncated) = fit_to_budget(parsed.results, self.max_result_chars);
        Ok(WebSearchOutput { results, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_posts_query_with_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_header("authorization", "Bearer tvly-test")
            .match_body(mockito::Matcher::PartialJson(json!({"query": "how long to rest steak"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"title":"Resting meat","url":"https://example.com/rest",
                   "content":"Rest steak for 5 to 10 minutes.","score":0.9}]}"#,
            )
            .create_async()
            .await;

        let tool = WebSearchTool::new(&format!("{}/search", server.url()), "tvly-test", 5, 4000);
        let out = tool
            .call(
                &ToolContext::new("u1"),
                WebSearchInput {
                    query: "how long to rest steak".to_string(),
                    max_results: None,
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].snippet, "Rest steak for 5 to 10 minutes.");
        assert!(!out.truncated);
    }

    #[test]
    fn test_fit_to_budget_truncates() {
        let hits = vec![
            SearchHit {
                title: "a".into(),
                url: "u".into(),
                snippet: "x".repeat(8),
            },
            SearchHit {
                title: "b".into(),
                url: "u".into(),
                snippet: "y".repeat(8),
            },
            SearchHit {
                title: "c".into(),
                url: "u".into(),
                snippet: "z".repeat(8),
            },
        ];
        let (out, truncated) = fit_to_budget(hits, 10);
        assert!(truncated);
        assert_eq!(out.len(), 2);
        assert!(out[1].snippet.starts_with("yy"));
        assert!(out[1].snippet.ends_with("...[truncated]"));
    }
}
