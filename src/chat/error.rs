//! 需要调用方区分处理的错误类型
//!
//! 其余错误统一走 `anyhow::Result`，在调用点附加上下文。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// 后端返回非零 errCode
    #[error("服务器错误 {code}: {message}")]
    Backend { code: i32, message: String },

    /// 后端 HTTP 状态码非 2xx
    #[error("HTTP 错误 {status}: {body}")]
    Http { status: u16, body: String },

    /// 检索 worker 已退出，请求无法送达或响应丢失
    #[error("检索 worker 已停止")]
    WorkerStopped,

    /// worker 返回的响应类型与请求不匹配
    #[error("检索 worker 返回了意外的响应，期望 {0}")]
    UnexpectedReply(&'static str),

    #[error("未找到: {0}")]
    NotFound(String),
}
