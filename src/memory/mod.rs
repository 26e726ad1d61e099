//! 记忆层：按会话的消息日志 + JSON 文件持久化

pub mod conversation;
pub mod persistence;
pub mod store;

pub use conversation::{Message, Role};
pub use persistence::{SessionLogFile, SessionMap};
pub use store::{SessionMemory, SessionSummary, NEW_CONVERSATION};
