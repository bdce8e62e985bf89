//! 待发送消息的远端投递

use crate::chat::backend::{AddMessageReq, AddMessageResp, BackendApi};
use crate::chat::queue::models::PendingMessage;
use crate::chat::store::LocalChatStore;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 把一条待发送消息投递到远端
///
/// 返回 `Err` 即视为本次投递失败，由队列负责计数和重试。
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    async fn deliver(&self, message: &PendingMessage) -> Result<()>;
}

/// 通过后端 `/message/add` 投递
///
/// 配置了本地会话存储时，消息里的本地会话 ID 会换成服务端会话 ID：
/// 尚未同步过的本地会话不带 `chatID` 投递，由服务端新建会话，
/// 返回的 `chatID` 记到本地会话上供后续消息使用。
pub struct HttpMessageDelivery {
    api: BackendApi,
    conversations: Option<LocalChatStore>,
    /// 新会话的首条消息串行投递，同一本地会话只在远端创建一次
    first_delivery: Mutex<()>,
}

impl HttpMessageDelivery {
    /// 会话 ID 原样发送
    pub fn new(api: BackendApi) -> Self {
        Self {
            api,
            conversations: None,
            first_delivery: Mutex::new(()),
        }
    }

    /// 启用本地会话 ID 到服务端会话 ID 的映射
    pub fn with_conversation_store(mut self, store: LocalChatStore) -> Self {
        self.conversations = Some(store);
        self
    }

    async fn post(&self, message: &PendingMessage, chat_id: Option<String>) -> Result<AddMessageResp> {
        let req = AddMessageReq {
            chat_id,
            ..AddMessageReq::from(message)
        };
        let resp = self.api.add_message(&req).await?;
        debug!(
            "[Delivery] 消息 {} 已投递，服务端ID: {}, 会话: {}",
            message.id, resp.message_id, resp.chat_id
        );
        Ok(resp)
    }

    /// 查询本地会话已记录的远端 ID；`None` 表示本地会话不存在
    async fn remote_id_of(store: &LocalChatStore, local_id: &str) -> Result<Option<Option<String>>> {
        Ok(store
            .get_conversation(local_id)
            .await?
            .map(|conv| conv.remote_id))
    }
}

#[async_trait]
impl MessageDelivery for HttpMessageDelivery {
    async fn deliver(&self, message: &PendingMessage) -> Result<()> {
        let (Some(store), Some(local_id)) = (&self.conversations, message.chat_id.as_deref()) else {
            self.post(message, message.chat_id.clone()).await?;
            return Ok(());
        };

        match Self::remote_id_of(store, local_id).await? {
            // 不是本地会话，按服务端 ID 处理
            None => {
                self.post(message, message.chat_id.clone()).await?;
            }
            Some(Some(remote_id)) => {
                self.post(message, Some(remote_id)).await?;
            }
            Some(None) => {
                let _first = self.first_delivery.lock().await;
                // 等锁期间可能已有同会话的消息完成首次投递
                if let Some(Some(remote_id)) = Self::remote_id_of(store, local_id).await? {
                    self.post(message, Some(remote_id)).await?;
                    return Ok(());
                }
                let resp = self.post(message, None).await?;
                match store.set_remote_id(local_id, &resp.chat_id).await {
                    Ok(_) => info!(
                        "[Delivery] 🔗 本地会话 {} 已关联远端会话 {}",
                        local_id, resp.chat_id
                    ),
                    // 消息已送达，不能再按失败重试
                    Err(e) => warn!(
                        "[Delivery] 记录会话 {} 的远端 ID {} 失败: {:?}",
                        local_id, resp.chat_id, e
                    ),
                }
            }
        }
        Ok(())
    }
}
