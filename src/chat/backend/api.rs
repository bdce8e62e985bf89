//! 后端 HTTP API 客户端
//!
//! 负责所有会话/消息相关的 HTTP 请求

use crate::chat::backend::types::{
    AddMessageReq, AddMessageResp, ConversationListResp, MessageListResp, RemoteConversation,
    RemoteMessage,
};
use crate::chat::types::{handle_http_response, ApiResponse};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// 后端 API 客户端
#[derive(Clone)]
pub struct BackendApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl BackendApi {
    /// 创建新的 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }

    /// 创建带 token 认证头的 API 客户端
    pub fn with_token(api_base_url: String, user_id: String, token: &str) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(token).context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::new(http_client, api_base_url, user_id))
    }

    async fn post<B, T>(&self, path: &str, body: &B, operation_name: &str) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);
        debug!(
            "[API] {} -> {} (用户ID: {}, 操作ID: {})",
            operation_name, url, self.user_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{}请求失败", operation_name))?;

        handle_http_response(response, operation_name).await
    }

    /// 新建远端会话
    pub async fn create_conversation(&self, title: &str, model_id: &str) -> Result<RemoteConversation> {
        let resp: ApiResponse<RemoteConversation> = self
            .post(
                "/conversation/create",
                &serde_json::json!({
                    "userID": self.user_id,
                    "title": title,
                    "modelID": model_id,
                }),
                "创建会话",
            )
            .await?;
        let conv = resp
            .data
            .ok_or_else(|| anyhow::anyhow!("创建会话响应中缺少 data 字段"))?;
        info!("[API] ✅ 远端会话已创建: {}", conv.id);
        Ok(conv)
    }

    pub async fn list_conversations(&self) -> Result<Vec<RemoteConversation>> {
        let resp: ApiResponse<ConversationListResp> = self
            .post(
                "/conversation/list",
                &serde_json::json!({ "userID": self.user_id }),
                "获取会话列表",
            )
            .await?;
        Ok(resp.data.map(|d| d.conversations).unwrap_or_default())
    }

    pub async fn delete_conversation(&self, chat_id: &str) -> Result<()> {
        let _: ApiResponse<serde_json::Value> = self
            .post(
                "/conversation/delete",
                &serde_json::json!({ "userID": self.user_id, "chatID": chat_id }),
                "删除会话",
            )
            .await?;
        info!("[API] 🗑️ 远端会话已删除: {}", chat_id);
        Ok(())
    }

    /// 新增消息（离线队列的投递通道）
    pub async fn add_message(&self, req: &AddMessageReq) -> Result<AddMessageResp> {
        let resp: ApiResponse<AddMessageResp> =
            self.post("/message/add", req, "发送消息").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("发送消息响应中缺少 data 字段"))
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<RemoteMessage>> {
        let resp: ApiResponse<MessageListResp> = self
            .post(
                "/message/list",
                &serde_json::json!({ "userID": self.user_id, "chatID": chat_id }),
                "获取消息列表",
            )
            .await?;
        Ok(resp.data.map(|d| d.messages).unwrap_or_default())
    }
}
