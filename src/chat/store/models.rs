//! 本地存储模型定义

use crate::chat::types::MessageRole;
use serde::{Deserialize, Serialize};

/// 本地会话（未登录模式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConversation {
    pub id: String,
    pub title: String,
    pub model_id: String,
    /// 创建时间（毫秒）
    pub created_at: i64,
    /// 最后一条消息写入时间（毫秒）
    pub updated_at: i64,
    /// 服务端会话 ID，首次投递成功前为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

/// 本地消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<serde_json::Value>>,
    pub created_at: i64,
}

/// 导出用：会话及其全部消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationExport {
    #[serde(flatten)]
    pub conversation: LocalConversation,
    pub messages: Vec<LocalMessage>,
}

/// 本地数据导出文档
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalExport {
    pub exported_at: i64,
    pub conversations: Vec<ConversationExport>,
}
