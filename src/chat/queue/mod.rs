//! 离线消息队列模块

pub mod dao;
pub mod delivery;
pub mod listener;
pub mod models;
pub mod service;

pub use dao::{PendingQueueDao, PENDING_MESSAGES_KEY};
pub use delivery::{HttpMessageDelivery, MessageDelivery};
pub use listener::{EmptyOfflineQueueListener, OfflineQueueListener};
pub use models::{
    NewPendingMessage, PendingMessage, QueueConfig, SendOptions, SyncReport, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
};
pub use service::OfflineQueue;
