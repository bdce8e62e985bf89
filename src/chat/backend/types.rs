//! 后端 API DTO（请求和响应结构体）

use crate::chat::queue::models::{PendingMessage, SendOptions};
use crate::chat::serialization::deserialize_vec_or_null;
use crate::chat::types::MessageRole;
use serde::{Deserialize, Serialize};

/// 远端会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    #[serde(rename = "chatID")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "modelID", default)]
    pub model_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// 远端消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    #[serde(rename = "messageID")]
    pub id: String,
    #[serde(rename = "chatID")]
    pub chat_id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "modelID", default)]
    pub model_id: String,
    #[serde(default)]
    pub created_at: i64,
}

/// 新增消息请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageReq {
    /// 客户端生成的消息 ID，服务端据此去重
    #[serde(rename = "clientMsgID")]
    pub client_msg_id: String,
    #[serde(rename = "chatID", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub content: String,
    pub role: MessageRole,
    #[serde(rename = "modelID")]
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<SendOptions>,
    /// 用户发出消息的原始时间（毫秒）
    pub timestamp: i64,
}

impl From<&PendingMessage> for AddMessageReq {
    fn from(msg: &PendingMessage) -> Self {
        Self {
            client_msg_id: msg.id.clone(),
            chat_id: msg.chat_id.clone(),
            content: msg.content.clone(),
            role: msg.role,
            model_id: msg.model_id.clone(),
            attachments: msg.attachments.clone(),
            options: msg.options.clone(),
            timestamp: msg.timestamp,
        }
    }
}

/// 新增消息响应
#[derive(Debug, Clone, Deserialize)]
pub struct AddMessageResp {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "chatID")]
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConversationListResp {
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub conversations: Vec<RemoteConversation>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageListResp {
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub messages: Vec<RemoteMessage>,
}
