//! 提醒：数据模型、持久化、调度与通知投递

pub mod dispatcher;
pub mod model;
pub mod notifier;
pub mod scheduler;
pub mod store;

pub use dispatcher::{DeliveryEvent, DeliveryOutcome, Dispatcher};
pub use model::{Reminder, ReminderStatus, Transition};
pub use notifier::{Notifier, NotifyError, NtfyNotifier, RecordingNotifier};
pub use scheduler::{RecoveryReport, ReminderScheduler, TOPIC_PREFERENCE};
pub use store::{MemoryReminderStore, ReminderStore, SqliteReminderStore};
