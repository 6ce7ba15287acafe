//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后：停止接收新请求 -> 取消进行中的消息（不写入任何轮次）
//! -> 等调度器把已派发的投递收尾 -> 关闭连接池。

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    Fatal(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token；调度循环与进行中的消息都挂在它（或其子 token）上
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::info!(reason = ?reason, "shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Terminate);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理步骤，按注册顺序执行
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    steps: Vec<Box<dyn ShutdownCleanup>>,
    /// 单个步骤的超时
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            steps: Vec::new(),
            step_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }

    /// 依次执行清理；单步失败或超时只记录，不影响后续步骤
    pub async fn run_cleanup(&self) {
        for step in &self.steps {
            let name = step.name();
            match tokio::time::timeout(self.step_timeout, step.cleanup()).await {
                Ok(Ok(())) => tracing::info!(step = name, "cleanup done"),
                Ok(Err(e)) => tracing::warn!(step = name, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(
                    step = name,
                    timeout_secs = self.step_timeout.as_secs(),
                    "cleanup timed out"
                ),
            }
        }
    }
}

/// 等待调度循环退出（其内部会等已派发的投递结束）
pub struct SchedulerDrain {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerDrain {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SchedulerDrain {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scheduler"
    }
}

/// 关闭 SQLite 连接池（WAL 检查点在最后一个连接关闭时完成）
pub struct PoolClose {
    pool: SqlitePool,
}

impl PoolClose {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for PoolClose {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
