//! 提醒调度器
//!
//! 待触发提醒保存在按 (due_at, id) 排序的集合中，整个集合由一把 std Mutex 保护，
//! 只在插入/弹出时短暂持有。tick(now) 按到期顺序弹出所有 due_at <= now 的提醒，
//! 持久化 pending → fired 后交给 Dispatcher（每个提醒恰好一次，投递之间互不排序）。

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::dispatcher::Dispatcher;
use super::model::{Reminder, ReminderStatus, Transition};
use super::store::ReminderStore;
use crate::core::StoreError;
use crate::session::SessionStore;

/// 会话偏好中指定通知 topic 的键
pub const TOPIC_PREFERENCE: &str = "ntfy_topic";

const INTERRUPTED: &str = "interrupted before delivery";

/// ntfy topic 只允许 `[-_A-Za-z0-9]{1,64}`
fn is_valid_topic(topic: &str) -> bool {
    (1..=64).contains(&topic.len())
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 启动恢复结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 重新入队的 pending 提醒
    pub requeued: usize,
    /// 触发后未完成投递、被标记为 failed 的提醒
    pub abandoned: usize,
}

pub struct ReminderScheduler {
    queue: Mutex<BTreeSet<(DateTime<Utc>, String)>>,
    store: Arc<dyn ReminderStore>,
    sessions: Arc<dyn SessionStore>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    default_topic: String,
    in_flight: TaskTracker,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        sessions: Arc<dyn SessionStore>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
        default_topic: impl Into<String>,
    ) -> Self {
        Self {
            queue: Mutex::new(BTreeSet::new()),
            store,
            sessions,
            dispatcher,
            poll_interval,
            default_topic: default_topic.into(),
            in_flight: TaskTracker::new(),
        }
    }

    fn enqueue(&self, due_at: DateTime<Utc>, id: String) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((due_at, id));
    }

    /// 弹出所有到期条目，按到期时间升序
    fn pop_due(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, String)> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while let Some(first) = queue.first() {
            if first.0 > now {
                break;
            }
            if let Some(entry) = queue.pop_first() {
                due.push(entry);
            }
        }
        due
    }

    /// 队列中待触发的提醒数
    pub fn pending_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 为已存在的会话创建提醒：先持久化为 pending，再入队
    pub async fn create(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
        message: &str,
    ) -> Result<Reminder, StoreError> {
        let session = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let topic = match session.preference(TOPIC_PREFERENCE).map(str::trim) {
            Some(t) if is_valid_topic(t) => t.to_string(),
            Some(t) => {
                tracing::warn!(session_id = %session_id, topic = %t, "invalid notification topic, using default");
                self.default_topic.clone()
            }
            None => self.default_topic.clone(),
        };

        let reminder = Reminder::new(session_id, due_at, message, topic);
        self.store.insert(&reminder).await?;
        self.enqueue(reminder.due_at, reminder.id.clone());
        tracing::info!(
            reminder_id = %reminder.id,
            session_id = %session_id,
            due_at = %reminder.due_at.to_rfc3339(),
            "reminder scheduled"
        );
        Ok(reminder)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        self.store.get(id).await
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Reminder>, StoreError> {
        self.store.list_for_session(session_id).await
    }

    /// 触发所有到期提醒，返回本次交给投递的数量
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for (due_at, id) in self.pop_due(now) {
            let transition = Transition::new(ReminderStatus::Pending, ReminderStatus::Fired);
            match self.store.transition(&id, transition).await {
                Ok(Some(reminder)) => {
                    fired += 1;
                    tracing::debug!(reminder_id = %id, due_at = %due_at.to_rfc3339(), "reminder fired");
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.in_flight.spawn(async move {
                        dispatcher.dispatch(&reminder).await;
                    });
                }
                Ok(None) => {
                    tracing::debug!(reminder_id = %id, "reminder no longer pending, dropped from queue");
                }
                Err(StoreError::ReminderNotFound(_)) => {
                    tracing::warn!(reminder_id = %id, "queued reminder missing from store");
                }
                Err(e) => {
                    // 存储暂时不可用：放回队列，下次 tick 再试
                    tracing::warn!(reminder_id = %id, error = %e, "cannot fire reminder, will retry");
                    self.enqueue(due_at, id);
                }
            }
        }
        fired
    }

    /// 启动恢复：pending 重新入队；fired（触发后进程中断）标记为 failed，不重复投递
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        for reminder in self.store.list_by_status(ReminderStatus::Pending).await? {
            self.enqueue(reminder.due_at, reminder.id);
            report.requeued += 1;
        }

        for reminder in self.store.list_by_status(ReminderStatus::Fired).await? {
            let transition = Transition::new(ReminderStatus::Fired, ReminderStatus::Failed)
                .with_error(INTERRUPTED);
            if self.store.transition(&reminder.id, transition).await?.is_some() {
                tracing::warn!(
                    reminder_id = %reminder.id,
                    session_id = %reminder.session_id,
                    "reminder was fired but never confirmed delivered; marked failed"
                );
                report.abandoned += 1;
            }
        }

        tracing::info!(
            requeued = report.requeued,
            abandoned = report.abandoned,
            "reminder scheduler recovered"
        );
        Ok(report)
    }

    /// 按 poll_interval 轮询直到取消；取消后等待进行中的投递结束
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "reminder scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }

        self.in_flight.close();
        self.in_flight.wait().await;
        tracing::info!("reminder scheduler stopped");
    }

    /// 等待当前所有投递任务完成（测试与关停使用）
    pub async fn wait_idle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::reminders::{MemoryReminderStore, NotifyError, RecordingNotifier};
    use crate::session::MemorySessionStore;
    use std::collections::BTreeMap;

    struct Fixture {
        scheduler: Arc<ReminderScheduler>,
        store: Arc<MemoryReminderStore>,
        sessions: Arc<MemorySessionStore>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(notifier: RecordingNotifier) -> Fixture {
        let store = Arc::new(MemoryReminderStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        sessions.create("u1", BTreeMap::new()).await.unwrap();
        let notifier = Arc::new(notifier);
        let dispatcher = Arc::new(Dispatcher::new(
            notifier.clone(),
            store.clone(),
            RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            sessions.clone(),
            dispatcher,
            Duration::from_millis(20),
            "souschef",
        ));
        Fixture {
            scheduler,
            store,
            sessions,
            notifier,
        }
    }

    #[tokio::test]
    async fn test_create_requires_existing_session() {
        let f = fixture(RecordingNotifier::new()).await;
        let err = f
            .scheduler
            .create("ghost", Utc::now(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
        assert_eq!(f.scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_topic_comes_from_session_preference() {
        let f = fixture(RecordingNotifier::new()).await;
        f.sessions
            .set_preference("u1", TOPIC_PREFERENCE, "ana-phone")
            .await
            .unwrap();
        let r = f.scheduler.create("u1", Utc::now(), "hello").await.unwrap();
        assert_eq!(r.topic, "ana-phone");
    }

    #[tokio::test]
    async fn test_invalid_topic_preference_falls_back_to_default() {
        let f = fixture(RecordingNotifier::new()).await;
        for bad in ["../admin", "kitchen?x=1", "a b", ""] {
            f.sessions
                .set_preference("u1", TOPIC_PREFERENCE, bad)
                .await
                .unwrap();
            let r = f.scheduler.create("u1", Utc::now(), "hello").await.unwrap();
            assert_eq!(r.topic, "souschef", "topic {bad:?}");
        }
        f.sessions
            .set_preference("u1", TOPIC_PREFERENCE, &"x".repeat(65))
            .await
            .unwrap();
        let r = f.scheduler.create("u1", Utc::now(), "hello").await.unwrap();
        assert_eq!(r.topic, "souschef");
    }

    #[tokio::test]
    async fn test_tick_fires_only_due_reminders_in_order() {
        let f = fixture(RecordingNotifier::new()).await;
        let now = Utc::now();
        let later = f
            .scheduler
            .create("u1", now + chrono::Duration::seconds(60), "later")
            .await
            .unwrap();
        f.scheduler
            .create("u1", now - chrono::Duration::seconds(1), "second")
            .await
            .unwrap();
        f.scheduler
            .create("u1", now - chrono::Duration::seconds(5), "first")
            .await
            .unwrap();

        assert_eq!(f.scheduler.tick(now).await, 2);
        f.scheduler.wait_idle().await;

        let delivered: Vec<String> = f.notifier.delivered().into_iter().map(|(_, m)| m).collect();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.contains(&"first".to_string()));
        assert!(delivered.contains(&"second".to_string()));
        assert_eq!(f.scheduler.pending_len(), 1);
        assert_eq!(
            f.store.get(&later.id).await.unwrap().unwrap().status,
            ReminderStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_tick_twice_dispatches_once() {
        let f = fixture(RecordingNotifier::new()).await;
        let now = Utc::now();
        f.scheduler.create("u1", now, "once").await.unwrap();
        assert_eq!(f.scheduler.tick(now).await, 1);
        assert_eq!(f.scheduler.tick(now).await, 0);
        f.scheduler.wait_idle().await;
        assert_eq!(f.notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn test_run_delivers_reminder_due_shortly() {
        let f = fixture(RecordingNotifier::new()).await;
        let mut events = f.scheduler.dispatcher.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&f.scheduler).run(cancel.clone()));

        let due = Utc::now() + chrono::Duration::milliseconds(200);
        let r = f.scheduler.create("u1", due, "stir").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.reminder_id, r.id);
        assert!(Utc::now() >= due);

        cancel.cancel();
        handle.await.unwrap();
        let stored = f.store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let f = fixture(RecordingNotifier::always_failing(NotifyError::Transient(
            "HTTP 503".into(),
        )))
        .await;
        let now = Utc::now();
        let r = f.scheduler.create("u1", now, "oops").await.unwrap();
        f.scheduler.tick(now).await;
        f.scheduler.wait_idle().await;

        assert_eq!(f.notifier.attempts(), 3);
        let stored = f.store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Failed);
    }

    #[tokio::test]
    async fn test_recover_requeues_pending_and_abandons_fired() {
        let f = fixture(RecordingNotifier::new()).await;
        let now = Utc::now();
        let pending = Reminder::new("u1", now - chrono::Duration::seconds(30), "overdue", "t");
        let fired = Reminder::new("u1", now - chrono::Duration::seconds(60), "half-done", "t");
        f.store.insert(&pending).await.unwrap();
        f.store.insert(&fired).await.unwrap();
        f.store
            .transition(
                &fired.id,
                Transition::new(ReminderStatus::Pending, ReminderStatus::Fired),
            )
            .await
            .unwrap();

        let report = f.scheduler.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, abandoned: 1 });

        assert_eq!(f.scheduler.tick(Utc::now()).await, 1);
        f.scheduler.wait_idle().await;

        assert_eq!(
            f.notifier.delivered(),
            vec![("t".to_string(), "overdue".to_string())]
        );
        let abandoned = f.store.get(&fired.id).await.unwrap().unwrap();
        assert_eq!(abandoned.status, ReminderStatus::Failed);
        assert_eq!(abandoned.last_error.as_deref(), Some(INTERRUPTED));
    }
}
