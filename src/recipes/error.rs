use thiserror::Error;

/// Mealie 调用错误
#[derive(Error, Debug)]
pub enum RecipeError {
    /// 连接失败、超时、5xx、429：读请求可重试
    #[error("Recipe manager unavailable: {0}")]
    Unavailable(String),

    #[error("Recipe manager returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response from recipe manager: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RecipeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Unavailable(format!("HTTP {}: {}", status.as_u16(), body))
        } else {
            Self::Api {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for RecipeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}
