//! 工具层：注册表、参数校验、执行器与内置工具

pub mod error;
pub mod executor;
pub mod mealplan;
pub mod preference;
pub mod recipes;
pub mod registry;
pub mod reminder;
pub mod schema;
pub mod search;

pub use error::ToolError;
pub use executor::ToolExecutor;
pub use mealplan::{MealPlanCreateBulkTool, MealPlanCreateTool, MealPlanListTool, MealPlanTodayTool};
pub use preference::PreferenceSetTool;
pub use recipes::{RecipeAddNoteTool, RecipeGetTool, RecipeImportTool, RecipeSearchTool};
pub use registry::{InvalidArguments, Tool, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};
pub use reminder::{parse_duration_text, ReminderCreateTool};
pub use search::WebSearchTool;
