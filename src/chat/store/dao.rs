//! 本地会话/消息数据访问层（DAO）
//!
//! 未登录模式下的消息日志，也是检索索引重建时的数据来源。
//! 每次写入后通过 [`SubscriptionRegistry`] 通知对应查询键的订阅者。

use crate::chat::serialization::{generate_msg_id, now_millis};
use crate::chat::store::models::{
    ConversationExport, LocalConversation, LocalExport, LocalMessage,
};
use crate::chat::subscription::{messages_key, SubscriptionRegistry, CONVERSATIONS_KEY};
use crate::chat::types::MessageRole;
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 本地会话存储（基于 sqlx）
#[derive(Clone)]
pub struct LocalChatStore {
    db: Pool<Sqlite>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl LocalChatStore {
    pub fn new(db: Pool<Sqlite>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self { db, subscriptions }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// 新建本地会话
    pub async fn create_conversation(&self, title: &str, model_id: &str) -> Result<LocalConversation> {
        let now = now_millis();
        let conv = LocalConversation {
            id: generate_msg_id(),
            title: title.to_string(),
            model_id: model_id.to_string(),
            created_at: now,
            updated_at: now,
            remote_id: None,
        };
        sqlx::query(
            r#"
            INSERT INTO local_conversations (conversation_id, title, model_id, create_time, update_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conv.id)
        .bind(&conv.title)
        .bind(&conv.model_id)
        .bind(conv.created_at)
        .bind(conv.updated_at)
        .execute(&self.db)
        .await
        .context("创建本地会话失败")?;

        info!("[LocalStore] 新建会话: {} ({})", conv.id, conv.title);
        self.subscriptions.notify(CONVERSATIONS_KEY);
        Ok(conv)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<LocalConversation>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, title, model_id, create_time, update_time, remote_id
            FROM local_conversations
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await
        .context("查询本地会话失败")?;
        row.map(Self::row_to_conversation).transpose()
    }

    /// 所有本地会话，最近更新的在前
    pub async fn list_conversations(&self) -> Result<Vec<LocalConversation>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, title, model_id, create_time, update_time, remote_id
            FROM local_conversations
            ORDER BY update_time DESC, create_time DESC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("查询本地会话列表失败")?;

        let conversations = rows
            .into_iter()
            .map(Self::row_to_conversation)
            .collect::<Result<Vec<_>>>()?;
        debug!("[LocalStore] 本地会话共 {} 个", conversations.len());
        Ok(conversations)
    }

    /// 记录本地会话对应的服务端会话 ID
    pub async fn set_remote_id(&self, conversation_id: &str, remote_id: &str) -> Result<bool> {
        let res = sqlx::query("UPDATE local_conversations SET remote_id = ? WHERE conversation_id = ?")
            .bind(remote_id)
            .bind(conversation_id)
            .execute(&self.db)
            .await
            .context("记录远端会话 ID 失败")?;
        debug!("[LocalStore] 会话 {} -> 远端会话 {}", conversation_id, remote_id);
        Ok(res.rows_affected() > 0)
    }

    /// 删除会话及其全部消息，返回会话是否存在
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let deleted_msgs = sqlx::query("DELETE FROM local_messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("删除会话消息失败")?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM local_conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("删除本地会话失败")?
            .rows_affected();
        tx.commit().await.context("提交事务失败")?;

        info!(
            "[LocalStore] 删除会话 {}，同时删除 {} 条消息",
            conversation_id, deleted_msgs
        );
        self.subscriptions.notify(CONVERSATIONS_KEY);
        self.subscriptions.notify(&messages_key(conversation_id));
        Ok(deleted > 0)
    }

    /// 更新会话的最后活跃时间
    pub async fn touch_conversation(&self, conversation_id: &str, time: i64) -> Result<()> {
        sqlx::query(
            "UPDATE local_conversations SET update_time = MAX(update_time, ?) WHERE conversation_id = ?",
        )
        .bind(time)
        .bind(conversation_id)
        .execute(&self.db)
        .await
        .context("更新会话时间失败")?;
        self.subscriptions.notify(CONVERSATIONS_KEY);
        Ok(())
    }

    /// 写入消息（同 ID 覆盖），并刷新所属会话的更新时间
    pub async fn add_message(&self, msg: &LocalMessage) -> Result<()> {
        let attachments = msg
            .attachments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("序列化附件失败")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO local_messages (
                message_id, conversation_id, role, content, model_id, attachments, create_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.chat_id)
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(&msg.model_id)
        .bind(attachments)
        .bind(msg.created_at)
        .execute(&self.db)
        .await
        .context("写入本地消息失败")?;

        debug!(
            "[LocalStore] 写入消息 {} -> 会话 {} ({})",
            msg.id, msg.chat_id, msg.role
        );
        self.touch_conversation(&msg.chat_id, msg.created_at).await?;
        self.subscriptions.notify(&messages_key(&msg.chat_id));
        Ok(())
    }

    /// 会话内的消息，按时间正序
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<LocalMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, conversation_id, role, content, model_id, attachments, create_time
            FROM local_messages
            WHERE conversation_id = ?
            ORDER BY create_time ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .context("查询会话消息失败")?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    /// 全部本地消息（用于重建检索索引）
    pub async fn all_messages(&self) -> Result<Vec<LocalMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, conversation_id, role, content, model_id, attachments, create_time
            FROM local_messages
            ORDER BY create_time ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("查询全部本地消息失败")?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM local_messages WHERE conversation_id = ? AND message_id = ?",
        )
        .bind(conversation_id)
        .bind(message_id)
        .execute(&self.db)
        .await
        .context("删除本地消息失败")?;
        self.subscriptions.notify(&messages_key(conversation_id));
        Ok(res.rows_affected() > 0)
    }

    /// 导出全部会话及消息
    pub async fn export(&self) -> Result<LocalExport> {
        let mut conversations = Vec::new();
        for conversation in self.list_conversations().await? {
            let messages = self.list_messages(&conversation.id).await?;
            conversations.push(ConversationExport {
                conversation,
                messages,
            });
        }
        Ok(LocalExport {
            exported_at: now_millis(),
            conversations,
        })
    }

    pub async fn export_json(&self) -> Result<String> {
        let export = self.export().await?;
        serde_json::to_string_pretty(&export).context("序列化导出数据失败")
    }

    fn row_to_conversation(row: SqliteRow) -> Result<LocalConversation> {
        Ok(LocalConversation {
            id: row.try_get("conversation_id")?,
            title: row.try_get("title")?,
            model_id: row.try_get("model_id")?,
            created_at: row.try_get("create_time")?,
            updated_at: row.try_get("update_time")?,
            remote_id: row.try_get("remote_id")?,
        })
    }

    fn row_to_message(row: SqliteRow) -> Result<LocalMessage> {
        let id: String = row.try_get("message_id")?;
        let role_raw: String = row.try_get("role")?;
        let role = role_raw.parse::<MessageRole>().unwrap_or_else(|_| {
            warn!("[LocalStore] 消息 {} 的角色无效: {}，按 user 处理", id, role_raw);
            MessageRole::User
        });
        let attachments = match row.try_get::<Option<String>, _>("attachments")? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("[LocalStore] 消息 {} 的附件无法解析，已忽略: {}", id, e);
                    None
                }
            },
            None => None,
        };
        Ok(LocalMessage {
            id,
            chat_id: row.try_get("conversation_id")?,
            role,
            content: row.try_get("content")?,
            model_id: row.try_get("model_id")?,
            attachments,
            created_at: row.try_get("create_time")?,
        })
    }
}
