//! 会话状态：每个用户一份持久会话（有序轮次 + 偏好）

pub mod model;
pub mod sqlite;
pub mod store;

pub use model::{Role, Session, Turn};
pub use sqlite::SqliteSessionStore;
pub use store::{MemorySessionStore, SessionLocks, SessionStore};
