//! 记忆层：单次运行的执行历史，以及历史到对话消息的展开

pub mod conversation;
pub mod history;

pub use conversation::{history_messages, Message, Role};
pub use history::{find_pr_url, ExecutionHistory, HistoryEntry};
