//! 提醒工具：为当前会话安排一条定时提醒
//!
//! 到期时间三选一：due_in_seconds、due_at（RFC 3339）或 due_in（"1 hr 20 min" 这类文本）。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reminders::ReminderScheduler;
use crate::tools::{InvalidArguments, Tool, ToolContext};

/// 最长提前一年
const MAX_LEAD_SECONDS: i64 = 366 * 24 * 3600;

fn duration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b").ok()
    })
    .as_ref()
}

/// 解析 "20 minutes"、"1 hr 30 min"、"90s" 等文本为秒数
pub fn parse_duration_text(text: &str) -> Option<i64> {
    let mut total = 0.0_f64;
    let mut matched = false;
    for caps in duration_regex()?.captures_iter(text) {
        let amount: f64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let factor = match unit.chars().next()? {
            'h' => 3600.0,
            'm' => 60.0,
            _ => 1.0,
        };
        total += amount * factor;
        matched = true;
    }
    (matched && total > 0.0).then(|| total.round() as i64)
}

pub struct ReminderCreateTool {
    scheduler: Arc<ReminderScheduler>,
}

impl ReminderCreateTool {
    pub fn new(scheduler: Arc<ReminderScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReminderCreateInput {
    /// What to remind the user about
    #[schemars(length(min = 1, max = 500))]
    pub message: String,
    /// Seconds from now
    #[schemars(range(min = 1))]
    pub due_in_seconds: Option<u64>,
    /// Absolute time, RFC 3339 (e.g. 2026-10-19T18:30:00Z)
    pub due_at: Option<String>,
    /// Relative time as text, e.g. "25 minutes" or "1 hr 10 min"
    pub due_in: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReminderCreateOutput {
    pub reminder_id: String,
    pub due_at: String,
    pub topic: String,
}

fn resolve_due(input: &ReminderCreateInput, now: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidArguments> {
    let given = [
        input.due_in_seconds.is_some(),
        input.due_at.is_some(),
        input.due_in.is_some(),
    ]
    .iter()
    .filter(|g| **g)
    .count();
    if given != 1 {
        return Err(InvalidArguments::new(
            "provide exactly one of due_in_seconds, due_at or due_in",
        ));
    }

    let due = if let Some(secs) = input.due_in_seconds {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_LEAD_SECONDS + 1);
        now + Duration::seconds(secs)
    } else if let Some(raw) = &input.due_at {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| InvalidArguments::new(format!("due_at is not an RFC 3339 time: {raw:?}")))?
    } else {
        let text = input.due_in.as_deref().unwrap_or_default();
        let secs = parse_duration_text(text)
            .ok_or_else(|| InvalidArguments::new(format!("cannot understand duration {text:?}")))?;
        if secs > MAX_LEAD_SECONDS {
            return Err(InvalidArguments::new("reminders can be at most a year ahead"));
        }
        now + Duration::seconds(secs)
    };

    if due < now {
        return Err(InvalidArguments::new("the reminder time is in the past"));
    }
    if (due - now).num_seconds() > MAX_LEAD_SECONDS {
        return Err(InvalidArguments::new("reminders can be at most a year ahead"));
    }
    Ok(due)
}

#[async_trait]
impl Tool for ReminderCreateTool {
    type Input = ReminderCreateInput;
    type Output = ReminderCreateOutput;

    fn name(&self) -> &str {
        "reminder_create"
    }

    fn description(&self) -> &str {
        "Schedule a push-notification reminder for this user (timers, defrosting, marinating)."
    }

    async fn call(&self, ctx: &ToolContext, input: ReminderCreateInput) -> anyhow::Result<ReminderCreateOutput> {
        let due = resolve_due(&input, Utc::now())?;
        let reminder = self
            .scheduler
            .create(&ctx.session_id, due, input.message.trim())
            .await?;
        Ok(ReminderCreateOutput {
            reminder_id: reminder.id,
            due_at: reminder.due_at.to_rfc3339(),
            topic: reminder.topic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(secs: Option<u64>, at: Option<&str>, text: Option<&str>) -> ReminderCreateInput {
        ReminderCreateInput {
            message: "check the oven".to_string(),
            due_in_seconds: secs,
            due_at: at.map(String::from),
            due_in: text.map(String::from),
        }
    }

    #[test]
    fn test_parse_duration_text_variants() {
        assert_eq!(parse_duration_text("20 minutes"), Some(1200));
        assert_eq!(parse_duration_text("1 hr 30 min"), Some(5400));
        assert_eq!(parse_duration_text("90s"), Some(90));
        assert_eq!(parse_duration_text("1.5 hours"), Some(5400));
        assert_eq!(parse_duration_text("soon"), None);
    }

    #[test]
    fn test_resolve_due_from_each_form() {
        let now = Utc::now();
        assert_eq!(resolve_due(&input(Some(2), None, None), now).unwrap(), now + Duration::seconds(2));
        assert_eq!(
            resolve_due(&input(None, None, Some("5 min")), now).unwrap(),
            now + Duration::seconds(300)
        );
        let at = (now + Duration::hours(1)).to_rfc3339();
        let due = resolve_due(&input(None, Some(&at), None), now).unwrap();
        assert_eq!(due.timestamp(), (now + Duration::hours(1)).timestamp());
    }

    #[test]
    fn test_resolve_due_rejects_ambiguous_missing_and_past() {
        let now = Utc::now();
        assert!(resolve_due(&input(None, None, None), now).is_err());
        assert!(resolve_due(&input(Some(5), None, Some("5 min")), now).is_err());
        let past = (now - Duration::hours(1)).to_rfc3339();
        assert!(resolve_due(&input(None, Some(&past), None), now).is_err());
        assert!(resolve_due(&input(Some(10_000_000_000), None, None), now).is_err());
    }

    #[test]
    fn test_resolve_due_rejects_huge_text_duration() {
        let now = Utc::now();
        let err = resolve_due(&input(None, None, Some("1000000000000 hours")), now).unwrap_err();
        assert!(err.to_string().contains("a year ahead"));
        assert!(resolve_due(&input(None, None, Some("400 days 9999999999999999999 hours")), now).is_err());
    }
}
