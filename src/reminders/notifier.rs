//! 通知代理客户端
//!
//! NtfyNotifier：`POST {base_url}/{topic}`，正文为提醒内容，Title 头为标题，可选 Bearer 令牌。
//! 连接失败、超时、5xx 与 429 视为瞬时错误，其余 4xx 为永久拒绝。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification broker unavailable: {0}")]
    Transient(String),

    #[error("notification rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, topic: &str, title: &str, message: &str) -> Result<(), NotifyError>;
}

pub struct NtfyNotifier {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl NtfyNotifier {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, topic: &str, title: &str, message: &str) -> Result<(), NotifyError> {
        let mut req = self
            .http
            .post(format!("{}/{}", self.base_url, topic))
            .header("Title", title)
            .header("Tags", "alarm_clock")
            .body(message.to_string());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| NotifyError::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(NotifyError::Transient(format!("HTTP {}: {}", status.as_u16(), body)))
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// 记录型通知器：按脚本返回失败，记录每次尝试（测试与离线运行）
#[derive(Default)]
pub struct RecordingNotifier {
    failures: Mutex<Vec<NotifyError>>,
    fail_forever: Option<NotifyError>,
    attempts: AtomicU32,
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 n 次尝试返回给定错误，之后成功
    pub fn failing_times(n: usize, error: NotifyError) -> Self {
        Self {
            failures: Mutex::new(vec![error; n]),
            ..Self::default()
        }
    }

    /// 每次尝试都返回给定错误
    pub fn always_failing(error: NotifyError) -> Self {
        Self {
            fail_forever: Some(error),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 成功投递的 (topic, message)
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, topic: &str, _title: &str, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_forever {
            return Err(err.clone());
        }
        if let Some(err) = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
        {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), message.to_string()));
        Ok(())
    }
}
