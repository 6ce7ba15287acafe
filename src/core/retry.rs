//! 有界指数退避重试
//!
//! 显式的计数循环（不递归）：第 n 次失败后等待 base * 2^(n-1)，上限 max_delay；总尝试次数不超过 max_attempts。

use std::future::Future;
use std::time::Duration;

/// 重试策略：总尝试次数（含首次）、基础延迟、延迟上限
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// 一次重试执行的结果：最终值/错误与实际尝试次数
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// 不重试（写操作使用）
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// 第 `failed_attempts` 次失败之后的等待时长
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// 执行 op；`is_transient` 判定错误是否可重试。不可重试的错误立即返回。
    pub async fn run<T, E, F, Fut>(&self, mut op: F, is_transient: impl Fn(&E) -> bool) -> Attempted<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(v) => {
                    return Attempted {
                        result: Ok(v),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < max && is_transient(&e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
