//! 远端后端函数（会话/消息）的 HTTP 客户端

pub mod api;
pub mod types;

pub use api::BackendApi;
pub use types::{AddMessageReq, AddMessageResp, RemoteConversation, RemoteMessage};
