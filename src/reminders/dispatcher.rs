//! 通知投递
//!
//! 一个已触发（fired）的提醒只经历一次投递序列：瞬时错误按 RetryPolicy 退避重试，
//! 总尝试次数不超过 retry_cap；永久拒绝立即停止。结果以 fired → delivered / failed 的
//! 比较并交换写回，并广播给订阅者。

use std::sync::Arc;

use tokio::sync::broadcast;

use super::model::{Reminder, ReminderStatus, Transition};
use super::notifier::{NotifyError, Notifier};
use super::store::ReminderStore;
use crate::core::RetryPolicy;

const REMINDER_TITLE: &str = "Kitchen reminder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// 提醒已不在 fired 状态（已被其他投递处理）
    Skipped,
}

/// 投递结果事件
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub reminder_id: String,
    pub session_id: String,
    pub outcome: DeliveryOutcome,
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn ReminderStore>,
    policy: RetryPolicy,
    events: broadcast::Sender<DeliveryEvent>,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn ReminderStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            notifier,
            store,
            policy,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    pub async fn dispatch(&self, reminder: &Reminder) -> DeliveryOutcome {
        let outcome = self.deliver(reminder).await;
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.events.send(DeliveryEvent {
            reminder_id: reminder.id.clone(),
            session_id: reminder.session_id.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn deliver(&self, reminder: &Reminder) -> DeliveryOutcome {
        match self.store.get(&reminder.id).await {
            Ok(Some(current)) if current.status == ReminderStatus::Fired => {}
            Ok(Some(current)) => {
                tracing::debug!(reminder_id = %reminder.id, status = %current.status, "reminder not in fired state, skipping");
                return DeliveryOutcome::Skipped;
            }
            Ok(None) => {
                tracing::warn!(reminder_id = %reminder.id, "reminder vanished before dispatch");
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(reminder_id = %reminder.id, error = %e, "cannot read reminder before dispatch");
                return DeliveryOutcome::Skipped;
            }
        }

        let notifier = &self.notifier;
        let attempted = self
            .policy
            .run(
                |attempt| async move {
                    tracing::debug!(reminder_id = %reminder.id, attempt, topic = %reminder.topic, "delivering reminder");
                    notifier
                        .notify(&reminder.topic, REMINDER_TITLE, &reminder.message)
                        .await
                },
                NotifyError::is_transient,
            )
            .await;
        let attempts = attempted.attempts;

        let (transition, outcome) = match attempted.result {
            Ok(()) => {
                tracing::info!(reminder_id = %reminder.id, session_id = %reminder.session_id, attempts, "reminder delivered");
                (
                    Transition::new(ReminderStatus::Fired, ReminderStatus::Delivered)
                        .with_attempts(attempts),
                    DeliveryOutcome::Delivered { attempts },
                )
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(
                    reminder_id = %reminder.id,
                    session_id = %reminder.session_id,
                    attempts,
                    error = %reason,
                    "reminder delivery failed"
                );
                (
                    Transition::new(ReminderStatus::Fired, ReminderStatus::Failed)
                        .with_attempts(attempts)
                        .with_error(reason.clone()),
                    DeliveryOutcome::Failed { attempts, reason },
                )
            }
        };

        match self.store.transition(&reminder.id, transition).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(reminder_id = %reminder.id, "reminder status changed during delivery");
            }
            Err(e) => {
                tracing::error!(reminder_id = %reminder.id, error = %e, "cannot record delivery outcome");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::{MemoryReminderStore, RecordingNotifier};
    use chrono::Utc;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20))
    }

    async fn fired_reminder(store: &MemoryReminderStore) -> Reminder {
        let r = Reminder::new("u1", Utc::now(), "check the roast", "kitchen");
        store.insert(&r).await.unwrap();
        store
            .transition(&r.id, Transition::new(ReminderStatus::Pending, ReminderStatus::Fired))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_delivers_and_marks_delivered() {
        let store = Arc::new(MemoryReminderStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = Dispatcher::new(notifier.clone(), store.clone(), policy());
        let r = fired_reminder(&store).await;

        let outcome = dispatcher.dispatch(&r).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        let stored = store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Delivered);
        assert_eq!(notifier.delivered(), vec![("kitchen".to_string(), "check the roast".to_string())]);
    }

    #[tokio::test]
    async fn test_three_transient_failures_stop_without_fourth_attempt() {
        let store = Arc::new(MemoryReminderStore::new());
        let notifier = Arc::new(RecordingNotifier::always_failing(NotifyError::Transient(
            "HTTP 503".into(),
        )));
        let dispatcher = Dispatcher::new(notifier.clone(), store.clone(), policy());
        let mut events = dispatcher.subscribe();
        let r = fired_reminder(&store).await;

        let outcome = dispatcher.dispatch(&r).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
        assert_eq!(notifier.attempts(), 3);

        let stored = store.get(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert!(stored.last_error.unwrap().contains("503"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.reminder_id, r.id);
        assert_eq!(event.outcome, outcome);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let store = Arc::new(MemoryReminderStore::new());
        let notifier = Arc::new(RecordingNotifier::failing_times(
            1,
            NotifyError::Transient("timeout".into()),
        ));
        let dispatcher = Dispatcher::new(notifier.clone(), store.clone(), policy());
        let r = fired_reminder(&store).await;

        assert_eq!(
            dispatcher.dispatch(&r).await,
            DeliveryOutcome::Delivered { attempts: 2 }
        );
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let store = Arc::new(MemoryReminderStore::new());
        let notifier = Arc::new(RecordingNotifier::always_failing(NotifyError::Rejected {
            status: 403,
            body: "forbidden".into(),
        }));
        let dispatcher = Dispatcher::new(notifier.clone(), store.clone(), policy());
        let r = fired_reminder(&store).await;

        let outcome = dispatcher.dispatch(&r).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn test_second_dispatch_of_same_reminder_is_skipped() {
        let store = Arc::new(MemoryReminderStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = Dispatcher::new(notifier.clone(), store.clone(), policy());
        let r = fired_reminder(&store).await;

        dispatcher.dispatch(&r).await;
        assert_eq!(dispatcher.dispatch(&r).await, DeliveryOutcome::Skipped);
        assert_eq!(notifier.attempts(), 1);
    }
}
