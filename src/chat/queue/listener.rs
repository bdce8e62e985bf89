//! 离线队列监听器回调接口
//!
//! 面向用户的提示（排队、同步成功、永久失败、网络状态）都通过这里发出。

use crate::chat::queue::models::SyncReport;
use async_trait::async_trait;

#[async_trait]
pub trait OfflineQueueListener: Send + Sync {
    /// 消息进入离线队列
    async fn on_message_queued(&self, message_id: String);

    /// 网络状态变化
    async fn on_network_status_changed(&self, online: bool);

    /// 批量同步开始，参数为队列快照长度
    async fn on_sync_started(&self, pending: usize);

    /// 批量同步结束
    async fn on_sync_finished(&self, report: SyncReport);

    /// 单条消息投递成功
    async fn on_message_delivered(&self, message_id: String);

    /// 一次同步中有消息投递成功（每次同步最多触发一次）
    async fn on_messages_synced(&self, delivered: usize);

    /// 消息达到重试上限被移除，需要用户手动处理
    async fn on_message_failed(&self, message_id: String, attempts: u32);
}

/// 空实现（默认监听器）
pub struct EmptyOfflineQueueListener;

#[async_trait]
impl OfflineQueueListener for EmptyOfflineQueueListener {
    async fn on_message_queued(&self, _message_id: String) {}
    async fn on_network_status_changed(&self, _online: bool) {}
    async fn on_sync_started(&self, _pending: usize) {}
    async fn on_sync_finished(&self, _report: SyncReport) {}
    async fn on_message_delivered(&self, _message_id: String) {}
    async fn on_messages_synced(&self, _delivered: usize) {}
    async fn on_message_failed(&self, _message_id: String, _attempts: u32) {}
}
