//! 本地存储模块
//!
//! 未登录模式的会话/消息日志、键值表与偏好设置

pub mod dao;
pub mod kv;
pub mod models;
pub mod preferences;

pub use dao::LocalChatStore;
pub use kv::KvStore;
pub use models::{ConversationExport, LocalConversation, LocalExport, LocalMessage};
pub use preferences::PreferenceStore;
