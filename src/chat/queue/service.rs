//! 离线消息队列服务层
//!
//! 网络不可用或发送失败时把消息缓存在本地，恢复联网后按顺序补发。
//! 状态流转：`queued → syncing → {delivered（移除）| queued（attempts+1）| stale（attempts>=上限，移除）}`

use crate::chat::error::ChatError;
use crate::chat::queue::dao::PendingQueueDao;
use crate::chat::queue::delivery::MessageDelivery;
use crate::chat::queue::listener::OfflineQueueListener;
use crate::chat::queue::models::{NewPendingMessage, PendingMessage, QueueConfig, SyncReport};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 单次投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Delivered,
    Retained { attempts: u32 },
    Failed,
    /// 投递期间消息已被用户丢弃
    Missing,
}

/// 正在投递的消息 ID，离开作用域时自动释放
struct InFlightGuard {
    set: Arc<StdMutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    fn claim(set: &Arc<StdMutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// 离线消息队列
#[derive(Clone)]
pub struct OfflineQueue {
    config: QueueConfig,
    dao: PendingQueueDao,
    delivery: Arc<dyn MessageDelivery>,
    listener: Arc<dyn OfflineQueueListener>,
    messages: Arc<Mutex<Vec<PendingMessage>>>,
    online: Arc<AtomicBool>,
    /// 批量同步互斥：同一时间只允许一个同步过程
    sync_lock: Arc<Mutex<()>>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl OfflineQueue {
    /// 从本地镜像恢复队列
    pub async fn load(
        config: QueueConfig,
        dao: PendingQueueDao,
        delivery: Arc<dyn MessageDelivery>,
        listener: Arc<dyn OfflineQueueListener>,
        online: bool,
    ) -> Result<Self> {
        let messages = dao.load().await?;
        info!(
            "[Queue] 离线队列已加载，待发送 {} 条，网络状态: {}",
            messages.len(),
            if online { "在线" } else { "离线" }
        );
        Ok(Self {
            config,
            dao,
            delivery,
            listener,
            messages: Arc::new(Mutex::new(messages)),
            online: Arc::new(AtomicBool::new(online)),
            sync_lock: Arc::new(Mutex::new(())),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// 当前队列快照（按入队顺序）
    pub async fn pending_messages(&self) -> Vec<PendingMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// 已用完自动重试次数、等待用户重试或丢弃的消息
    pub async fn stale_messages(&self) -> Vec<PendingMessage> {
        let max_attempts = self.config.max_attempts;
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.is_stale(max_attempts))
            .cloned()
            .collect()
    }

    /// 构建待发送消息并入队，返回消息 ID
    pub async fn queue_message(&self, data: NewPendingMessage) -> Result<String> {
        self.enqueue(PendingMessage::new(data)).await
    }

    /// 入队一条已构建好的消息（直接发送失败时保留原 ID）
    pub async fn enqueue(&self, message: PendingMessage) -> Result<String> {
        let id = message.id.clone();
        {
            let mut queue = self.messages.lock().await;
            let mut next = queue.clone();
            next.push(message);
            self.commit(&mut queue, next).await?;
            info!("[Queue] 📥 消息已加入离线队列: {}，当前 {} 条", id, queue.len());
        }
        self.listener.on_message_queued(id.clone()).await;
        Ok(id)
    }

    /// 批量同步：依次投递队列中的消息
    ///
    /// 离线或已有同步在进行时直接返回 `skipped`。过期消息不会被自动重试。
    pub async fn sync_pending_messages(&self) -> Result<SyncReport> {
        if !self.is_online() {
            debug!("[Queue] 当前离线，跳过同步");
            return Ok(SyncReport::skipped());
        }
        let Ok(_sync_guard) = self.sync_lock.try_lock() else {
            info!("[Queue] 已有同步在进行，本次跳过");
            return Ok(SyncReport::skipped());
        };

        let snapshot = self.pending_messages().await;
        let mut report = SyncReport::default();
        if snapshot.is_empty() {
            return Ok(report);
        }

        info!("[Queue] 🔄 开始同步离线消息，共 {} 条", snapshot.len());
        self.listener.on_sync_started(snapshot.len()).await;

        for message in &snapshot {
            if message.is_stale(self.config.max_attempts) {
                debug!(
                    "[Queue] 消息 {} 已过期（attempts={}），等待用户处理",
                    message.id, message.attempts
                );
                report.stale += 1;
                continue;
            }
            if !self.is_online() {
                report.retained += 1;
                continue;
            }
            let Some(_claim) = InFlightGuard::claim(&self.in_flight, &message.id) else {
                debug!("[Queue] 消息 {} 正在被单独重试，本次跳过", message.id);
                report.retained += 1;
                continue;
            };

            report.attempted += 1;
            match self.attempt(message).await {
                Ok(AttemptOutcome::Delivered) => report.delivered += 1,
                Ok(AttemptOutcome::Retained { .. }) => report.retained += 1,
                Ok(AttemptOutcome::Failed) => report.failed += 1,
                Ok(AttemptOutcome::Missing) => report.attempted -= 1,
                Err(e) => {
                    warn!("[Queue] 更新离线队列失败: {:?}", e);
                    report.retained += 1;
                }
            }
        }

        info!(
            "[Queue] ✅ 同步完成：成功 {}，保留 {}，永久失败 {}，过期 {}",
            report.delivered, report.retained, report.failed, report.stale
        );
        if report.delivered > 0 {
            self.listener.on_messages_synced(report.delivered).await;
        }
        self.listener.on_sync_finished(report.clone()).await;
        Ok(report)
    }

    /// 单独重试一条消息（不受过期状态限制）
    ///
    /// 成功返回 `true`；离线或消息正在投递中返回 `false` 且不计入尝试次数。
    pub async fn retry_message(&self, id: &str) -> Result<bool> {
        let message = self
            .messages
            .lock()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("待发送消息 {}", id)))?;

        if !self.is_online() {
            info!("[Queue] 当前离线，暂不重试消息 {}", id);
            return Ok(false);
        }
        let Some(_claim) = InFlightGuard::claim(&self.in_flight, id) else {
            info!("[Queue] 消息 {} 正在投递中，忽略重复重试", id);
            return Ok(false);
        };

        info!("[Queue] 🔁 手动重试消息 {}（已失败 {} 次）", id, message.attempts);
        let outcome = self.attempt(&message).await?;
        Ok(outcome == AttemptOutcome::Delivered)
    }

    /// 用户丢弃一条消息
    pub async fn discard_message(&self, id: &str) -> Result<bool> {
        let removed = self.remove(id).await?;
        if removed {
            info!("[Queue] 🗑️ 用户丢弃消息 {}", id);
        }
        Ok(removed)
    }

    /// 清空队列，返回移除条数
    pub async fn clear_queue(&self) -> Result<usize> {
        let mut queue = self.messages.lock().await;
        let count = queue.len();
        self.commit(&mut queue, Vec::new()).await?;
        info!("[Queue] 离线队列已清空，移除 {} 条", count);
        Ok(count)
    }

    /// 网络状态变化
    ///
    /// 恢复联网时延迟一小段时间后触发批量同步，返回该同步任务；
    /// 断网只更新状态并通知，不改动队列。
    pub async fn set_network_status(&self, online: bool) -> Option<JoinHandle<()>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return None;
        }
        self.listener.on_network_status_changed(online).await;

        if !online {
            warn!("[Queue] 📴 网络已断开，新消息将进入离线队列");
            return None;
        }

        let delay = self.config.reconnect_delay;
        info!("[Queue] 🌐 网络已恢复，{:?} 后同步离线消息", delay);
        let queue = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.sync_pending_messages().await {
                warn!("[Queue] 恢复联网后的同步失败: {:?}", e);
            }
        }))
    }

    /// 启动后台定时同步，收到关闭信号（或发送端被丢弃）时退出
    pub fn start_background_sync(
        &self,
        every: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            info!("[Queue] 后台同步已启动，间隔 {:?}", every);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !queue.is_online() || queue.pending_count().await == 0 {
                            continue;
                        }
                        if let Err(e) = queue.sync_pending_messages().await {
                            warn!("[Queue] 后台同步失败: {:?}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("[Queue] 后台同步已停止");
                        break;
                    }
                }
            }
        })
    }

    /// 投递一条消息并更新队列，调用方需持有该消息的 [`InFlightGuard`]
    async fn attempt(&self, message: &PendingMessage) -> Result<AttemptOutcome> {
        if !self.messages.lock().await.iter().any(|m| m.id == message.id) {
            return Ok(AttemptOutcome::Missing);
        }

        match self.delivery.deliver(message).await {
            Ok(()) => {
                self.remove(&message.id).await?;
                info!("[Queue] 📤 消息 {} 投递成功", message.id);
                self.listener.on_message_delivered(message.id.clone()).await;
                Ok(AttemptOutcome::Delivered)
            }
            Err(e) => {
                warn!("[Queue] 消息 {} 投递失败: {:?}", message.id, e);
                self.record_failure(&message.id).await
            }
        }
    }

    /// 记录一次失败；达到上限时标记过期并移除
    ///
    /// 持久化失败时内存中的队列保持原样，消息仍按原尝试次数保留。
    async fn record_failure(&self, id: &str) -> Result<AttemptOutcome> {
        let (attempts, removed) = {
            let mut queue = self.messages.lock().await;
            let Some(pos) = queue.iter().position(|m| m.id == id) else {
                return Ok(AttemptOutcome::Missing);
            };
            let mut next = queue.clone();
            next[pos].attempts += 1;
            let attempts = next[pos].attempts;
            let removed = next[pos].is_stale(self.config.max_attempts);
            if removed {
                next.remove(pos);
            }
            self.commit(&mut queue, next).await?;
            (attempts, removed)
        };

        if removed {
            warn!(
                "[Queue] ❌ 消息 {} 已失败 {} 次，标记为过期并移出队列",
                id, attempts
            );
            self.listener.on_message_failed(id.to_string(), attempts).await;
            Ok(AttemptOutcome::Failed)
        } else {
            debug!("[Queue] 消息 {} 保留在队列中，attempts={}", id, attempts);
            Ok(AttemptOutcome::Retained { attempts })
        }
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut queue = self.messages.lock().await;
        let next: Vec<PendingMessage> = queue.iter().filter(|m| m.id != id).cloned().collect();
        if next.len() == queue.len() {
            return Ok(false);
        }
        self.commit(&mut queue, next).await?;
        Ok(true)
    }

    /// 先持久化新队列，成功后才替换内存中的队列
    async fn commit(&self, queue: &mut Vec<PendingMessage>, next: Vec<PendingMessage>) -> Result<()> {
        self.dao.save(&next).await?;
        *queue = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let set = Arc::new(StdMutex::new(HashSet::new()));
        let first = InFlightGuard::claim(&set, "m1");
        assert!(first.is_some());
        assert!(InFlightGuard::claim(&set, "m1").is_none());
        assert!(InFlightGuard::claim(&set, "m2").is_some());

        drop(first);
        assert!(InFlightGuard::claim(&set, "m1").is_some());
    }
}
