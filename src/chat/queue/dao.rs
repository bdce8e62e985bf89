//! 待发送队列的本地镜像
//!
//! 整个队列以 JSON 数组保存在键值表的一个键下，每次变更后整体覆盖写入。

use crate::chat::queue::models::PendingMessage;
use crate::chat::store::kv::KvStore;
use anyhow::{Context, Result};
use tracing::{debug, warn};

/// 队列镜像在键值表中的键
pub const PENDING_MESSAGES_KEY: &str = "pendingMessages";

#[derive(Clone)]
pub struct PendingQueueDao {
    kv: KvStore,
}

impl PendingQueueDao {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// 读取持久化的队列
    ///
    /// 内容无法解析时丢弃该条目并返回空队列，不影响启动。
    pub async fn load(&self) -> Result<Vec<PendingMessage>> {
        let Some(raw) = self.kv.get(PENDING_MESSAGES_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<PendingMessage>>(&raw) {
            Ok(messages) => {
                debug!("[QueueDAO] 读取待发送队列，共 {} 条", messages.len());
                Ok(messages)
            }
            Err(e) => {
                warn!("[QueueDAO] ⚠️ 待发送队列数据损坏，已重置: {}", e);
                self.kv.remove(PENDING_MESSAGES_KEY).await?;
                Ok(Vec::new())
            }
        }
    }

    /// 覆盖写入当前队列
    pub async fn save(&self, messages: &[PendingMessage]) -> Result<()> {
        if messages.is_empty() {
            self.kv.remove(PENDING_MESSAGES_KEY).await?;
            return Ok(());
        }
        let raw = serde_json::to_string(messages).context("序列化待发送队列失败")?;
        self.kv.set(PENDING_MESSAGES_KEY, &raw).await
    }
}
