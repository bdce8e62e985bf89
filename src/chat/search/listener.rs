//! 检索 worker 的进度回调
//!
//! 事件都带有触发它的请求 ID，调用方据此区分并发的索引请求。

use async_trait::async_trait;

#[async_trait]
pub trait SearchWorkerListener: Send + Sync {
    /// 批量索引进度，每 100 条触发一次
    async fn on_index_progress(&self, request_id: u64, done: usize, total: usize);

    /// 批量索引完成
    async fn on_index_complete(&self, request_id: u64, total: usize);
}

pub struct EmptySearchWorkerListener;

#[async_trait]
impl SearchWorkerListener for EmptySearchWorkerListener {
    async fn on_index_progress(&self, _request_id: u64, _done: usize, _total: usize) {}
    async fn on_index_complete(&self, _request_id: u64, _total: usize) {}
}
