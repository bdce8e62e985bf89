//! T2 Chat 客户端核心
//!
//! 把本地存储、离线队列、后端投递和检索 worker 组装在一起。

use crate::chat::backend::BackendApi;
use crate::chat::db::create_sqlite_pool_with_migration;
use crate::chat::env_config::{env_parse_with_default, env_string_with_default};
use crate::chat::queue::{
    EmptyOfflineQueueListener, HttpMessageDelivery, MessageDelivery, NewPendingMessage,
    OfflineQueue, OfflineQueueListener, PendingMessage, PendingQueueDao, QueueConfig, SyncReport,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use crate::chat::search::{
    EmptySearchWorkerListener, IndexReceipt, IndexableMessage, ProcessPayload, ProcessedMessage,
    SearchHit, SearchWorker, SearchWorkerHandle, SearchWorkerListener, DEFAULT_SEARCH_LIMIT,
};
use crate::chat::store::{KvStore, LocalChatStore, LocalConversation, LocalMessage, PreferenceStore};
use crate::chat::subscription::{SubscriptionCallback, SubscriptionId, SubscriptionRegistry};
use anyhow::Result;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 后台定时同步的默认间隔
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// 自动创建会话时标题的最大字符数
const AUTO_TITLE_CHARS: usize = 40;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_id: String,
    /// 认证 token（只读使用，不负责登录流程）
    pub token: String,
    /// 后端 HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://t2chat.db?mode=rwc`
    pub db_url: String,
    pub max_attempts: u32,
    pub reconnect_delay: Duration,
    /// 后台定时同步间隔，`None` 表示不启动
    pub sync_interval: Option<Duration>,
    pub search_limit: usize,
    /// 启动时的网络状态
    pub start_online: bool,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            token,
            api_base_url: "http://localhost:10002".to_string(),
            db_url: "sqlite://t2chat.db?mode=rwc".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            sync_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            search_limit: DEFAULT_SEARCH_LIMIT,
            start_online: true,
        }
    }

    /// 默认配置叠加 `T2CHAT_*` 环境变量
    pub fn from_env(user_id: String, token: String) -> Self {
        let defaults = Self::new(user_id, token);
        let sync_secs = env_parse_with_default(
            "T2CHAT_SYNC_INTERVAL_SECS",
            defaults.sync_interval.map_or(0, |d| d.as_secs()),
        );
        Self {
            api_base_url: env_string_with_default("T2CHAT_API_BASE_URL", &defaults.api_base_url),
            db_url: env_string_with_default("T2CHAT_DB_URL", &defaults.db_url),
            max_attempts: env_parse_with_default("T2CHAT_MAX_ATTEMPTS", defaults.max_attempts),
            reconnect_delay: Duration::from_millis(env_parse_with_default(
                "T2CHAT_RECONNECT_DELAY_MS",
                defaults.reconnect_delay.as_millis() as u64,
            )),
            // 0 表示关闭后台同步
            sync_interval: (sync_secs > 0).then(|| Duration::from_secs(sync_secs)),
            search_limit: env_parse_with_default("T2CHAT_SEARCH_LIMIT", defaults.search_limit),
            ..defaults
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_attempts: self.max_attempts.max(1),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 已直接投递到后端
    Delivered { message_id: String, chat_id: String },
    /// 离线或投递失败，已进入离线队列
    Queued { message_id: String, chat_id: String },
}

impl SendOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            SendOutcome::Delivered { message_id, .. } | SendOutcome::Queued { message_id, .. } => {
                message_id
            }
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }
}

/// T2 Chat 客户端
pub struct T2ChatClient {
    config: ClientConfig,
    store: LocalChatStore,
    preferences: PreferenceStore,
    queue: OfflineQueue,
    delivery: Arc<dyn MessageDelivery>,
    search: SearchWorkerHandle,
    search_task: JoinHandle<()>,
    sync_shutdown: Option<mpsc::Sender<()>>,
    sync_task: Option<JoinHandle<()>>,
}

impl T2ChatClient {
    /// 使用 HTTP 投递和空监听器创建客户端
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_listeners(
            config,
            Arc::new(EmptyOfflineQueueListener),
            Arc::new(EmptySearchWorkerListener),
        )
        .await
    }

    /// 使用 HTTP 投递（本地会话 ID 自动映射到服务端会话）和指定监听器创建客户端
    pub async fn with_listeners(
        config: ClientConfig,
        queue_listener: Arc<dyn OfflineQueueListener>,
        search_listener: Arc<dyn SearchWorkerListener>,
    ) -> Result<Self> {
        let api = BackendApi::with_token(
            config.api_base_url.clone(),
            config.user_id.clone(),
            &config.token,
        )?;
        Self::assemble(
            config,
            move |store: LocalChatStore| -> Arc<dyn MessageDelivery> {
                Arc::new(HttpMessageDelivery::new(api).with_conversation_store(store))
            },
            queue_listener,
            search_listener,
        )
        .await
    }

    /// 指定投递通道和监听器创建客户端
    pub async fn with_parts(
        config: ClientConfig,
        delivery: Arc<dyn MessageDelivery>,
        queue_listener: Arc<dyn OfflineQueueListener>,
        search_listener: Arc<dyn SearchWorkerListener>,
    ) -> Result<Self> {
        Self::assemble(config, move |_| delivery, queue_listener, search_listener).await
    }

    async fn assemble<F>(
        config: ClientConfig,
        make_delivery: F,
        queue_listener: Arc<dyn OfflineQueueListener>,
        search_listener: Arc<dyn SearchWorkerListener>,
    ) -> Result<Self>
    where
        F: FnOnce(LocalChatStore) -> Arc<dyn MessageDelivery>,
    {
        info!("[Client] 初始化客户端，用户: {}", config.user_id);
        let pool = create_sqlite_pool_with_migration(&config.db_url).await?;
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let store = LocalChatStore::new(pool.clone(), subscriptions);
        let kv = KvStore::new(pool);
        let preferences = PreferenceStore::new(kv.clone());
        let delivery = make_delivery(store.clone());

        let queue = OfflineQueue::load(
            config.queue_config(),
            PendingQueueDao::new(kv),
            delivery.clone(),
            queue_listener,
            config.start_online,
        )
        .await?;

        let (search, search_task) = SearchWorker::spawn(search_listener);

        let (sync_shutdown, sync_task) = match config.sync_interval {
            Some(every) => {
                let (tx, rx) = mpsc::channel(1);
                (Some(tx), Some(queue.start_background_sync(every, rx)))
            }
            None => (None, None),
        };

        let client = Self {
            config,
            store,
            preferences,
            queue,
            delivery,
            search,
            search_task,
            sync_shutdown,
            sync_task,
        };

        // 索引只在内存中，启动时从本地消息重建
        if let Err(e) = client.rebuild_search_index().await {
            warn!("[Client] 启动时重建检索索引失败: {:?}", e);
        }
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalChatStore {
        &self.store
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn search_worker(&self) -> &SearchWorkerHandle {
        &self.search
    }

    pub fn is_online(&self) -> bool {
        self.queue.is_online()
    }

    pub async fn create_conversation(&self, title: &str, model_id: &str) -> Result<LocalConversation> {
        self.store.create_conversation(title, model_id).await
    }

    /// 删除本地会话，同时把它的消息移出检索索引
    pub async fn delete_conversation(&self, chat_id: &str) -> Result<bool> {
        let ids: Vec<String> = self
            .store
            .list_messages(chat_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let deleted = self.store.delete_conversation(chat_id).await?;
        if deleted && !ids.is_empty() {
            if let Err(e) = self.search.remove_messages(ids).await {
                warn!("[Client] 从检索索引移除会话 {} 的消息失败: {:?}", chat_id, e);
            }
        }
        Ok(deleted)
    }

    /// 删除一条本地消息，同时移出检索索引；尚未发送的消息一并从离线队列丢弃
    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        let deleted = self.store.delete_message(chat_id, message_id).await?;
        if !deleted {
            return Ok(false);
        }
        if let Err(e) = self.search.remove_messages(vec![message_id.to_string()]).await {
            warn!("[Client] 从检索索引移除消息 {} 失败: {:?}", message_id, e);
        }
        self.queue.discard_message(message_id).await?;
        Ok(true)
    }

    /// 发送消息
    ///
    /// 先写入本地并加入索引；在线时直接投递，离线或投递失败时进入离线队列。
    /// 未指定会话时按消息内容自动新建一个本地会话，远端会话在首次投递时创建。
    pub async fn send_message(&self, data: NewPendingMessage) -> Result<SendOutcome> {
        let chat_id = match &data.chat_id {
            Some(id) => id.clone(),
            None => {
                let title: String = data.content.chars().take(AUTO_TITLE_CHARS).collect();
                self.store
                    .create_conversation(title.trim(), &data.model_id)
                    .await?
                    .id
            }
        };
        let message = PendingMessage::new(NewPendingMessage {
            chat_id: Some(chat_id.clone()),
            ..data
        });

        let local = LocalMessage {
            id: message.id.clone(),
            chat_id: chat_id.clone(),
            role: message.role,
            content: message.content.clone(),
            model_id: message.model_id.clone(),
            attachments: message.attachments.clone(),
            created_at: message.timestamp,
        };
        self.store.add_message(&local).await?;
        if let Err(e) = self
            .search
            .index_messages(vec![IndexableMessage::from(&local)])
            .await
        {
            warn!("[Client] 新消息加入检索索引失败: {:?}", e);
        }

        let message_id = message.id.clone();
        if self.queue.is_online() {
            match self.delivery.deliver(&message).await {
                Ok(()) => {
                    info!("[Client] 📤 消息 {} 已发送", message_id);
                    return Ok(SendOutcome::Delivered {
                        message_id,
                        chat_id,
                    });
                }
                Err(e) => {
                    warn!("[Client] 消息 {} 发送失败，转入离线队列: {:?}", message_id, e);
                }
            }
        }

        self.queue.enqueue(message).await?;
        Ok(SendOutcome::Queued {
            message_id,
            chat_id,
        })
    }

    /// 网络状态变化，恢复联网时返回延迟同步任务
    pub async fn set_network_status(&self, online: bool) -> Option<JoinHandle<()>> {
        self.queue.set_network_status(online).await
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        self.queue.sync_pending_messages().await
    }

    pub async fn retry(&self, message_id: &str) -> Result<bool> {
        self.queue.retry_message(message_id).await
    }

    pub async fn discard(&self, message_id: &str) -> Result<bool> {
        self.queue.discard_message(message_id).await
    }

    pub async fn pending_messages(&self) -> Vec<PendingMessage> {
        self.queue.pending_messages().await
    }

    pub async fn stale_messages(&self) -> Vec<PendingMessage> {
        self.queue.stale_messages().await
    }

    /// 按配置的条数上限搜索
    pub async fn search(&self, query: &str, chat_id: Option<&str>) -> Result<Vec<SearchHit>> {
        self.search
            .search(query, chat_id, self.config.search_limit)
            .await
    }

    pub async fn process_message(&self, payload: ProcessPayload) -> Result<ProcessedMessage> {
        self.search.process_message(payload).await
    }

    /// 清空检索索引并从本地消息重建
    pub async fn rebuild_search_index(&self) -> Result<IndexReceipt> {
        let messages: Vec<IndexableMessage> = self
            .store
            .all_messages()
            .await?
            .iter()
            .map(IndexableMessage::from)
            .collect();
        self.search.clear_index().await?;
        let receipt = self.search.index_messages(messages).await?;
        info!(
            "[Client] 🔍 检索索引已重建，共 {} 条 (请求 #{})",
            receipt.indexed, receipt.request_id
        );
        Ok(receipt)
    }

    pub fn subscribe(&self, key: &str, callback: SubscriptionCallback) -> SubscriptionId {
        self.store.subscriptions().subscribe(key, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.subscriptions().unsubscribe(id)
    }

    pub async fn export_json(&self) -> Result<String> {
        self.store.export_json().await
    }

    /// 停止后台同步和检索 worker，并等待任务退出
    pub async fn shutdown(mut self) {
        info!("[Client] 正在关闭客户端");
        if let Some(tx) = self.sync_shutdown.take() {
            // 接收端已退出时无需通知
            let _ = tx.send(()).await;
        }
        self.search.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self
            .sync_task
            .take()
            .into_iter()
            .chain(std::iter::once(self.search_task))
            .collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("[Client] 后台任务异常退出: {:?}", e);
            }
        }
        info!("[Client] 客户端已关闭");
    }
}
