//! Souschef - 厨房助手编排服务
//!
//! 入口：初始化日志与配置，装配运行时，恢复未完成的提醒，启动调度循环与 HTTP 服务。

use std::sync::Arc;

use anyhow::Context;
use souschef::{
    config::load_config,
    core::{PoolClose, RuntimeBuilder, SchedulerDrain, ShutdownCoordinator, ShutdownManager},
    observability,
    server::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("failed to load configuration")?;
    let bind = config.server.bind.clone();

    let runtime = Arc::new(RuntimeBuilder::new(config).build().await?);

    let report = runtime
        .scheduler
        .recover()
        .await
        .context("failed to recover reminders")?;
    tracing::info!(
        requeued = report.requeued,
        abandoned = report.abandoned,
        "reminder queue recovered"
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let scheduler_task = tokio::spawn(Arc::clone(&runtime.scheduler).run(shutdown.token()));

    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(SchedulerDrain::new(scheduler_task));
    if let Some(pool) = runtime.pool.clone() {
        coordinator.register(PoolClose::new(pool));
    }

    let state = Arc::new(AppState {
        runtime: Arc::clone(&runtime),
        shutdown: shutdown.token(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "souschef listening");

    let graceful = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.wait_for_shutdown().await })
        .await
        .context("server error")?;

    coordinator.run_cleanup().await;
    tracing::info!("shutdown complete");
    Ok(())
}
