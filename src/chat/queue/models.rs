//! 离线队列模型定义

use crate::chat::serialization::{generate_msg_id, now_millis};
use crate::chat::types::MessageRole;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 自动重试上限：尝试次数达到该值的消息视为过期（stale）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 恢复联网后触发批量同步前的等待时间
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// 发送选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_gen: Option<bool>,
}

/// 待发送消息
///
/// 本地持久化的 JSON 结构与 Web 端 localStorage 中的条目保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub content: String,
    pub role: MessageRole,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<serde_json::Value>>,
    /// 入队时间（毫秒）
    pub timestamp: i64,
    /// 已失败的投递次数
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SendOptions>,
}

impl PendingMessage {
    /// 从入队数据构建，生成新 ID，尝试次数为 0
    pub fn new(data: NewPendingMessage) -> Self {
        Self {
            id: generate_msg_id(),
            chat_id: data.chat_id,
            content: data.content,
            role: data.role,
            model_id: data.model_id,
            attachments: data.attachments,
            timestamp: now_millis(),
            attempts: 0,
            options: data.options,
        }
    }

    /// 是否已用完自动重试次数
    pub fn is_stale(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }
}

/// 入队时调用方提供的数据
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingMessage {
    pub chat_id: Option<String>,
    pub content: String,
    pub role: MessageRole,
    pub model_id: String,
    pub attachments: Option<Vec<serde_json::Value>>,
    pub options: Option<SendOptions>,
}

impl NewPendingMessage {
    /// 用户发出的纯文本消息
    pub fn user_text(chat_id: Option<String>, content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            role: MessageRole::User,
            model_id: model_id.into(),
            attachments: None,
            options: None,
        }
    }
}

/// 一次批量同步的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// 实际发起投递的消息数
    pub attempted: usize,
    /// 投递成功并移出队列
    pub delivered: usize,
    /// 达到重试上限被移除（永久失败）
    pub failed: usize,
    /// 仍留在队列中等待下次同步
    pub retained: usize,
    /// 已过期、等待用户手动处理而未自动重试
    pub stale: usize,
    /// 离线或已有同步在进行，本次未执行
    pub skipped: bool,
}

impl SyncReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// 离线队列配置
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_shape_uses_camel_case_and_omits_absent_fields() {
        let msg = PendingMessage {
            id: "p1".into(),
            chat_id: None,
            content: "hello".into(),
            role: MessageRole::User,
            model_id: "m1".into(),
            attachments: None,
            timestamp: 1_700_000_000_000,
            attempts: 0,
            options: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "p1",
                "content": "hello",
                "role": "user",
                "modelId": "m1",
                "timestamp": 1_700_000_000_000_i64,
                "attempts": 0
            })
        );
    }

    #[test]
    fn reload_reconstructs_equal_message() {
        let msg = PendingMessage {
            id: "p2".into(),
            chat_id: Some("c9".into()),
            content: "draw a cat".into(),
            role: MessageRole::User,
            model_id: "img-1".into(),
            attachments: Some(vec![serde_json::json!({"url": "https://x/y.png"})]),
            timestamp: 42,
            attempts: 2,
            options: Some(SendOptions {
                web_search: Some(false),
                image_gen: Some(true),
            }),
        };
        let raw = serde_json::to_string(&msg).unwrap();
        let back: PendingMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn new_message_starts_fresh() {
        let msg = PendingMessage::new(NewPendingMessage::user_text(None, "hello", "m1"));
        assert_eq!(msg.attempts, 0);
        assert!(msg.chat_id.is_none());
        assert!(!msg.is_stale(DEFAULT_MAX_ATTEMPTS));
        assert!(msg.timestamp > 0);
    }
}
