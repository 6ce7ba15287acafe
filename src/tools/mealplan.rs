//! 膳食计划工具：今日计划、区间查询、新建条目（单条或批量）

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::recipes::recipe_failure;
use crate::recipes::{MealPlanEntry, MealieClient, NewMealPlanEntry};
use crate::tools::{InvalidArguments, Tool, ToolContext};

fn check_date(field: &str, raw: &str) -> Result<String, InvalidArguments> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| InvalidArguments::new(format!("{field} must be a YYYY-MM-DD date, got {raw:?}")))
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct MealPlanOutput {
    pub entries: Vec<MealPlanEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

pub struct MealPlanTodayTool {
    client: Arc<MealieClient>,
}

impl MealPlanTodayTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for MealPlanTodayTool {
    type Input = NoArgs;
    type Output = MealPlanOutput;

    fn name(&self) -> &str {
        "mealplan_today"
    }

    fn description(&self) -> &str {
        "List today's meal-plan entries."
    }

    async fn call(&self, _ctx: &ToolContext, _input: NoArgs) -> anyhow::Result<MealPlanOutput> {
        let entries = self.client.todays_mealplan().await.map_err(recipe_failure)?;
        Ok(MealPlanOutput { entries })
    }
}

pub struct MealPlanListTool {
    client: Arc<MealieClient>,
}

impl MealPlanListTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MealPlanListInput {
    /// First day (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// Last day (YYYY-MM-DD)
    pub end_date: Option<String>,
}

#[async_trait]
impl Tool for MealPlanListTool {
    type Input = MealPlanListInput;
    type Output = MealPlanOutput;

    fn name(&self) -> &str {
        "mealplan_list"
    }

    fn description(&self) -> &str {
        "List meal-plan entries between two dates."
    }

    async fn call(&self, _ctx: &ToolContext, input: MealPlanListInput) -> anyhow::Result<MealPlanOutput> {
        let start = input
            .start_date
            .as_deref()
            .map(|d| check_date("start_date", d))
            .transpose()?;
        let end = input
            .end_date
            .as_deref()
            .map(|d| check_date("end_date", d))
            .transpose()?;
        let entries = self
            .client
            .mealplans(start.as_deref(), end.as_deref())
            .await
            .map_err(recipe_failure)?;
        Ok(MealPlanOutput { entries })
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    Breakfast,
    Lunch,
    Dinner,
    Side,
    Snack,
    Dessert,
}

impl EntryType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Side => "side",
            Self::Snack => "snack",
            Self::Dessert => "dessert",
        }
    }
}

pub struct MealPlanCreateTool {
    client: Arc<MealieClient>,
}

impl MealPlanCreateTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MealPlanCreateInput {
    /// Day of the meal (YYYY-MM-DD)
    pub date: String,
    /// Recipe id from recipe_search / recipe_get
    pub recipe_id: Option<String>,
    /// Free-text entry when not using a recipe
    pub title: Option<String>,
    /// Defaults to breakfast
    pub entry_type: Option<EntryType>,
}

#[async_trait]
impl Tool for MealPlanCreateTool {
    type Input = MealPlanCreateInput;
    type Output = MealPlanEntry;

    fn name(&self) -> &str {
        "mealplan_create"
    }

    fn description(&self) -> &str {
        "Add an entry to the meal plan. Provide either recipe_id or title."
    }

    async fn call(&self, _ctx: &ToolContext, input: MealPlanCreateInput) -> anyhow::Result<MealPlanEntry> {
        let entry = prepare_entry(input)?;
        self.client
            .create_mealplan(&entry)
            .await
            .map_err(recipe_failure)
    }
}

fn prepare_entry(input: MealPlanCreateInput) -> Result<NewMealPlanEntry, InvalidArguments> {
    let date = check_date("date", &input.date)?;
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let recipe_id = non_empty(input.recipe_id);
    let title = non_empty(input.title);
    if recipe_id.is_none() && title.is_none() {
        return Err(InvalidArguments::new("either recipe_id or title must be provided"));
    }
    Ok(NewMealPlanEntry {
        date,
        entry_type: input.entry_type.unwrap_or_default().as_str().to_string(),
        recipe_id,
        title,
    })
}

pub struct MealPlanCreateBulkTool {
    client: Arc<MealieClient>,
}

impl MealPlanCreateBulkTool {
    pub fn new(client: Arc<MealieClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MealPlanCreateBulkInput {
    /// Entries to add, same fields as mealplan_create
    #[schemars(length(min = 1, max = 31))]
    pub entries: Vec<MealPlanCreateInput>,
}

#[async_trait]
impl Tool for MealPlanCreateBulkTool {
    type Input = MealPlanCreateBulkInput;
    type Output = MealPlanOutput;

    fn name(&self) -> &str {
        "mealplan_create_bulk"
    }

    fn description(&self) -> &str {
        "Add several meal-plan entries at once, e.g. planning a whole week."
    }

    /// 先校验全部条目，再逐条创建；中途失败时错误里带上已创建数量
    async fn call(&self, _ctx: &ToolContext, input: MealPlanCreateBulkInput) -> anyhow::Result<MealPlanOutput> {
        let prepared = input
            .entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                prepare_entry(e).map_err(|err| InvalidArguments::new(format!("entries[{i}]: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total = prepared.len();
        let mut entries = Vec::with_capacity(total);
        for entry in &prepared {
            let created = self
                .client
                .create_mealplan(entry)
                .await
                .map_err(recipe_failure)
                .with_context(|| format!("created {} of {total} entries before failing", entries.len()))?;
            entries.push(created);
        }
        tracing::info!(count = total, "mealplan entries created in bulk");
        Ok(MealPlanOutput { entries })
    }
}
