pub mod chat;

// 重新导出常用类型，方便外部使用
pub use chat::{
    client::{ClientConfig, SendOutcome, T2ChatClient},
    error::ChatError,
    queue::{NewPendingMessage, OfflineQueue, PendingMessage, SyncReport},
    search::{SearchHit, SearchWorkerHandle},
    store::{LocalChatStore, LocalConversation, LocalMessage},
    types::MessageRole,
};
