//! T2 Chat CLI
//!
//! 非交互式命令行工具，用于查看和操作本地离线队列、检索本地消息、导出聊天记录

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use t2chat_sdk_core::chat::queue::{NewPendingMessage, OfflineQueueListener, SendOptions, SyncReport};
use t2chat_sdk_core::chat::search::SearchWorkerListener;
use t2chat_sdk_core::{ClientConfig, SendOutcome, T2ChatClient};
use tracing::{error, info, warn};

/// T2 Chat CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "t2chat-cli")]
#[command(about = "T2 Chat CLI - 离线队列与本地检索工具", long_about = None)]
struct Args {
    /// 用户 ID
    #[arg(short, long, default_value = "local")]
    user_id: String,

    /// 认证 token
    #[arg(short, long, default_value = "")]
    token: String,

    /// 以离线状态启动（消息只进入队列）
    #[arg(long)]
    offline: bool,

    /// 日志级别（默认: info,t2chat_sdk_core=debug）
    #[arg(long, default_value = "info,t2chat_sdk_core=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出离线队列中的消息
    Pending,
    /// 立即同步离线队列
    Sync,
    /// 发送一条消息（离线或失败时进入队列）
    Send {
        content: String,
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long, default_value = "gpt-4o-mini")]
        model_id: String,
        #[arg(long)]
        web_search: bool,
    },
    /// 手动重试一条待发送消息
    Retry { id: String },
    /// 丢弃一条待发送消息
    Discard { id: String },
    /// 在本地消息中搜索
    Search {
        query: String,
        #[arg(long)]
        chat_id: Option<String>,
    },
    /// 导出本地会话和消息为 JSON
    Export {
        /// 输出文件，不指定时打印到 stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// 初始化日志（同时输出到 stderr 和文件，stdout 留给命令结果）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("t2chat.log")
        .context("无法创建日志文件 t2chat.log")?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: t2chat.log");
    Ok(())
}

struct CliQueueListener;

#[async_trait::async_trait]
impl OfflineQueueListener for CliQueueListener {
    async fn on_message_queued(&self, message_id: String) {
        info!("[CLI/Queue] 📥 消息已排队，联网后自动发送: {}", message_id);
    }

    async fn on_network_status_changed(&self, online: bool) {
        info!("[CLI/Queue] 🌐 网络状态: {}", if online { "在线" } else { "离线" });
    }

    async fn on_sync_started(&self, pending: usize) {
        info!("[CLI/Queue] 🔄 开始同步 {} 条消息", pending);
    }

    async fn on_sync_finished(&self, report: SyncReport) {
        info!("[CLI/Queue] ✅ 同步结束: {:?}", report);
    }

    async fn on_message_delivered(&self, message_id: String) {
        info!("[CLI/Queue] 📤 已送达: {}", message_id);
    }

    async fn on_messages_synced(&self, delivered: usize) {
        info!("[CLI/Queue] 🎉 {} 条离线消息已同步", delivered);
    }

    async fn on_message_failed(&self, message_id: String, attempts: u32) {
        error!(
            "[CLI/Queue] ❌ 消息 {} 重试 {} 次仍失败，已移出队列",
            message_id, attempts
        );
    }
}

struct CliSearchListener;

#[async_trait::async_trait]
impl SearchWorkerListener for CliSearchListener {
    async fn on_index_progress(&self, request_id: u64, done: usize, total: usize) {
        info!("[CLI/Search] 📊 索引进度 #{}: {}/{}", request_id, done, total);
    }

    async fn on_index_complete(&self, request_id: u64, total: usize) {
        info!("[CLI/Search] ✅ 索引完成 #{}: {} 条", request_id, total);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("序列化输出失败")?
    );
    Ok(())
}

async fn run(client: &T2ChatClient, command: Command) -> Result<()> {
    match command {
        Command::Pending => {
            let pending = client.pending_messages().await;
            info!("[CLI] 📋 离线队列（共 {} 条）", pending.len());
            print_json(&pending)?;
        }
        Command::Sync => {
            let report = client.sync().await?;
            if report.skipped {
                warn!("[CLI] 当前离线或已有同步在进行，本次未执行");
            }
            print_json(&report)?;
        }
        Command::Send {
            content,
            chat_id,
            model_id,
            web_search,
        } => {
            let mut data = NewPendingMessage::user_text(chat_id, content, model_id);
            if web_search {
                data.options = Some(SendOptions {
                    web_search: Some(true),
                    image_gen: None,
                });
            }
            match client.send_message(data).await? {
                SendOutcome::Delivered {
                    message_id,
                    chat_id,
                } => info!("[CLI] ✅ 已发送 {}（会话 {}）", message_id, chat_id),
                SendOutcome::Queued {
                    message_id,
                    chat_id,
                } => info!("[CLI] 📥 已排队 {}（会话 {}）", message_id, chat_id),
            }
        }
        Command::Retry { id } => {
            if client.retry(&id).await? {
                info!("[CLI] ✅ 重试成功: {}", id);
            } else {
                warn!("[CLI] 重试未成功: {}", id);
            }
        }
        Command::Discard { id } => {
            if client.discard(&id).await? {
                info!("[CLI] 🗑️ 已丢弃: {}", id);
            } else {
                warn!("[CLI] 队列中没有该消息: {}", id);
            }
        }
        Command::Search { query, chat_id } => {
            let hits = client.search(&query, chat_id.as_deref()).await?;
            info!("[CLI] 🔍 {:?} 命中 {} 条", query, hits.len());
            print_json(&hits)?;
        }
        Command::Export { output } => {
            let json = client.export_json().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("写入导出文件 {} 失败", path))?;
                    info!("[CLI] 💾 已导出到 {}", path);
                }
                None => println!("{}", json),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    let mut config = ClientConfig::from_env(args.user_id.clone(), args.token.clone());
    // 单次命令不需要后台同步
    config.sync_interval = None;
    config.start_online = !args.offline;
    info!(
        "[CLI] 🚀 用户: {}，后端: {}，数据库: {}",
        config.user_id, config.api_base_url, config.db_url
    );

    let client = T2ChatClient::with_listeners(
        config,
        Arc::new(CliQueueListener),
        Arc::new(CliSearchListener),
    )
    .await?;

    let result = run(&client, args.command).await;
    client.shutdown().await;
    result
}
