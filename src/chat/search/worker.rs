//! 后台检索 worker
//!
//! 一个 tokio 任务独占 [`SearchIndex`]，按到达顺序逐个处理请求。
//! 每个请求带请求 ID 与 oneshot 回复通道，进度事件通过监听器按请求 ID 发出。

use crate::chat::error::ChatError;
use crate::chat::search::index::{IndexStats, IndexableMessage, SearchHit, SearchIndex};
use crate::chat::search::listener::SearchWorkerListener;
use crate::chat::search::markdown::{process_message, ProcessPayload, ProcessedMessage};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 批量索引时每处理多少条发一次进度并让出执行权
pub const INDEX_PROGRESS_BATCH: usize = 100;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// 请求内容
#[derive(Debug, Clone)]
pub enum WorkerPayload {
    IndexMessages(Vec<IndexableMessage>),
    Search {
        query: String,
        chat_id: Option<String>,
        limit: usize,
    },
    ProcessMessage(ProcessPayload),
    RemoveMessages(Vec<String>),
    ClearIndex,
    Stats,
}

impl WorkerPayload {
    fn kind(&self) -> &'static str {
        match self {
            WorkerPayload::IndexMessages(_) => "index",
            WorkerPayload::Search { .. } => "search",
            WorkerPayload::ProcessMessage(_) => "process",
            WorkerPayload::RemoveMessages(_) => "remove",
            WorkerPayload::ClearIndex => "clear",
            WorkerPayload::Stats => "stats",
        }
    }
}

/// 响应内容，与 [`WorkerPayload`] 一一对应
#[derive(Debug, Clone)]
pub enum WorkerReply {
    Indexed(usize),
    SearchResults(Vec<SearchHit>),
    Processed(Box<ProcessedMessage>),
    Removed(usize),
    Cleared(usize),
    Stats(IndexStats),
}

enum WorkerCommand {
    Request {
        request_id: u64,
        payload: WorkerPayload,
        reply_tx: oneshot::Sender<WorkerReply>,
    },
    Shutdown,
}

/// 一次批量索引的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReceipt {
    pub request_id: u64,
    pub indexed: usize,
}

pub struct SearchWorker {
    receiver: mpsc::Receiver<WorkerCommand>,
    index: SearchIndex,
    listener: Arc<dyn SearchWorkerListener>,
}

impl SearchWorker {
    /// 启动 worker 任务，返回句柄和任务本身
    pub fn spawn(listener: Arc<dyn SearchWorkerListener>) -> (SearchWorkerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let worker = Self {
            receiver,
            index: SearchIndex::new(),
            listener,
        };
        let task = tokio::spawn(worker.run());
        let handle = SearchWorkerHandle {
            sender,
            next_request_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("[SearchWorker] 检索 worker 已启动");
        while let Some(command) = self.receiver.recv().await {
            match command {
                WorkerCommand::Request {
                    request_id,
                    payload,
                    reply_tx,
                } => {
                    let kind = payload.kind();
                    let reply = self.handle(request_id, payload).await;
                    if reply_tx.send(reply).is_err() {
                        debug!(
                            "[SearchWorker] 请求 #{} ({}) 的调用方已放弃等待",
                            request_id, kind
                        );
                    }
                }
                WorkerCommand::Shutdown => break,
            }
        }
        info!(
            "[SearchWorker] 检索 worker 已停止，释放 {} 条索引",
            self.index.len()
        );
    }

    async fn handle(&mut self, request_id: u64, payload: WorkerPayload) -> WorkerReply {
        match payload {
            WorkerPayload::IndexMessages(messages) => {
                WorkerReply::Indexed(self.index_messages(request_id, messages).await)
            }
            WorkerPayload::Search {
                query,
                chat_id,
                limit,
            } => {
                let hits = self.index.search(&query, chat_id.as_deref(), limit);
                debug!(
                    "[SearchWorker] 请求 #{} 搜索 {:?} 命中 {} 条",
                    request_id,
                    query,
                    hits.len()
                );
                WorkerReply::SearchResults(hits)
            }
            WorkerPayload::ProcessMessage(payload) => {
                WorkerReply::Processed(Box::new(process_message(&payload)))
            }
            WorkerPayload::RemoveMessages(ids) => {
                let removed = ids.iter().filter(|id| self.index.remove(id)).count();
                WorkerReply::Removed(removed)
            }
            WorkerPayload::ClearIndex => WorkerReply::Cleared(self.index.clear()),
            WorkerPayload::Stats => WorkerReply::Stats(self.index.stats()),
        }
    }

    async fn index_messages(&mut self, request_id: u64, messages: Vec<IndexableMessage>) -> usize {
        let total = messages.len();
        info!("[SearchWorker] 请求 #{} 开始索引 {} 条消息", request_id, total);
        for (i, message) in messages.into_iter().enumerate() {
            self.index.insert(message);
            let done = i + 1;
            if done % INDEX_PROGRESS_BATCH == 0 {
                self.listener.on_index_progress(request_id, done, total).await;
                tokio::task::yield_now().await;
            }
        }
        self.listener.on_index_complete(request_id, total).await;
        info!(
            "[SearchWorker] ✅ 请求 #{} 索引完成，当前共 {} 条",
            request_id,
            self.index.len()
        );
        total
    }
}

/// worker 句柄，可在多个任务间克隆使用
#[derive(Clone)]
pub struct SearchWorkerHandle {
    sender: mpsc::Sender<WorkerCommand>,
    next_request_id: Arc<AtomicU64>,
}

impl SearchWorkerHandle {
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// 发送一个请求并等待响应，返回请求 ID 与响应
    pub async fn request(&self, payload: WorkerPayload) -> Result<(u64, WorkerReply)> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Request {
                request_id,
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| ChatError::WorkerStopped)?;
        let reply = reply_rx.await.map_err(|_| ChatError::WorkerStopped)?;
        Ok((request_id, reply))
    }

    pub async fn index_messages(&self, messages: Vec<IndexableMessage>) -> Result<IndexReceipt> {
        match self.request(WorkerPayload::IndexMessages(messages)).await? {
            (request_id, WorkerReply::Indexed(indexed)) => Ok(IndexReceipt {
                request_id,
                indexed,
            }),
            _ => Err(ChatError::UnexpectedReply("Indexed").into()),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        chat_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let payload = WorkerPayload::Search {
            query: query.to_string(),
            chat_id: chat_id.map(str::to_string),
            limit,
        };
        match self.request(payload).await? {
            (_, WorkerReply::SearchResults(hits)) => Ok(hits),
            _ => Err(ChatError::UnexpectedReply("SearchResults").into()),
        }
    }

    pub async fn process_message(&self, payload: ProcessPayload) -> Result<ProcessedMessage> {
        match self.request(WorkerPayload::ProcessMessage(payload)).await? {
            (_, WorkerReply::Processed(processed)) => Ok(*processed),
            _ => Err(ChatError::UnexpectedReply("Processed").into()),
        }
    }

    pub async fn remove_messages(&self, ids: Vec<String>) -> Result<usize> {
        match self.request(WorkerPayload::RemoveMessages(ids)).await? {
            (_, WorkerReply::Removed(removed)) => Ok(removed),
            _ => Err(ChatError::UnexpectedReply("Removed").into()),
        }
    }

    pub async fn clear_index(&self) -> Result<usize> {
        match self.request(WorkerPayload::ClearIndex).await? {
            (_, WorkerReply::Cleared(cleared)) => Ok(cleared),
            _ => Err(ChatError::UnexpectedReply("Cleared").into()),
        }
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        match self.request(WorkerPayload::Stats).await? {
            (_, WorkerReply::Stats(stats)) => Ok(stats),
            _ => Err(ChatError::UnexpectedReply("Stats").into()),
        }
    }

    /// 通知 worker 退出；已在排队的请求会收到 [`ChatError::WorkerStopped`]
    pub async fn shutdown(&self) {
        if self.sender.send(WorkerCommand::Shutdown).await.is_err() {
            warn!("[SearchWorker] worker 已停止，忽略重复的关闭请求");
        }
    }
}
