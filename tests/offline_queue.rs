//! 离线队列集成测试：使用可控的投递桩和记录型监听器

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use t2chat_sdk_core::chat::db::create_sqlite_pool_with_migration;
use t2chat_sdk_core::chat::queue::{
    MessageDelivery, NewPendingMessage, OfflineQueue, OfflineQueueListener, PendingMessage,
    PendingQueueDao, QueueConfig, SyncReport, PENDING_MESSAGES_KEY,
};
use t2chat_sdk_core::chat::store::KvStore;
use t2chat_sdk_core::ChatError;
use tokio::sync::mpsc;

#[derive(Default)]
struct StubDelivery {
    rejected: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StubDelivery {
    fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// 内容等于 `content` 的消息一律投递失败
    fn reject(&self, content: &str) {
        self.rejected.lock().unwrap().insert(content.to_string());
    }

    fn accept(&self, content: &str) {
        self.rejected.lock().unwrap().remove(content);
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageDelivery for StubDelivery {
    async fn deliver(&self, message: &PendingMessage) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected.lock().unwrap().contains(&message.content) {
            anyhow::bail!("backend rejected {}", message.id);
        }
        self.delivered.lock().unwrap().push(message.id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingListener {
    queued: Mutex<Vec<String>>,
    network: Mutex<Vec<bool>>,
    synced: Mutex<Vec<usize>>,
    finished: Mutex<Vec<SyncReport>>,
    failed: Mutex<Vec<(String, u32)>>,
}

#[async_trait]
impl OfflineQueueListener for RecordingListener {
    async fn on_message_queued(&self, message_id: String) {
        self.queued.lock().unwrap().push(message_id);
    }
    async fn on_network_status_changed(&self, online: bool) {
        self.network.lock().unwrap().push(online);
    }
    async fn on_sync_started(&self, _pending: usize) {}
    async fn on_sync_finished(&self, report: SyncReport) {
        self.finished.lock().unwrap().push(report);
    }
    async fn on_message_delivered(&self, _message_id: String) {}
    async fn on_messages_synced(&self, delivered: usize) {
        self.synced.lock().unwrap().push(delivered);
    }
    async fn on_message_failed(&self, message_id: String, attempts: u32) {
        self.failed.lock().unwrap().push((message_id, attempts));
    }
}

fn test_config() -> QueueConfig {
    QueueConfig {
        max_attempts: 3,
        reconnect_delay: Duration::from_millis(10),
    }
}

async fn memory_kv() -> KvStore {
    let pool = create_sqlite_pool_with_migration("sqlite::memory:")
        .await
        .unwrap();
    KvStore::new(pool)
}

async fn open_queue(
    kv: &KvStore,
    delivery: Arc<StubDelivery>,
    online: bool,
) -> (OfflineQueue, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::default());
    let queue = OfflineQueue::load(
        test_config(),
        PendingQueueDao::new(kv.clone()),
        delivery,
        listener.clone(),
        online,
    )
    .await
    .unwrap();
    (queue, listener)
}

fn hello() -> NewPendingMessage {
    NewPendingMessage::user_text(None, "hello", "m1")
}

#[tokio::test]
async fn queued_offline_message_is_delivered_after_reconnect() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    let (queue, listener) = open_queue(&kv, delivery.clone(), false).await;

    let id = queue.queue_message(hello()).await.unwrap();
    let pending = queue.pending_messages().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 0);
    assert_eq!(*listener.queued.lock().unwrap(), vec![id.clone()]);

    // 离线时同步直接跳过
    assert!(queue.sync_pending_messages().await.unwrap().skipped);
    assert_eq!(delivery.calls(), 0);

    let task = queue
        .set_network_status(true)
        .await
        .expect("reconnect schedules a sync");
    task.await.unwrap();

    assert_eq!(queue.pending_count().await, 0);
    assert_eq!(delivery.delivered(), vec![id]);
    assert_eq!(*listener.synced.lock().unwrap(), vec![1]);
    assert_eq!(*listener.network.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn three_failed_deliveries_remove_the_message() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    delivery.reject("hello");
    let (queue, listener) = open_queue(&kv, delivery.clone(), true).await;

    let id = queue.queue_message(hello()).await.unwrap();
    queue
        .queue_message(NewPendingMessage::user_text(None, "keep me", "m1"))
        .await
        .unwrap();
    delivery.reject("keep me");

    for expected_attempts in 1..=2 {
        let report = queue.sync_pending_messages().await.unwrap();
        assert_eq!(report.retained, 2);
        let pending = queue.pending_messages().await;
        assert!(pending.iter().all(|m| m.attempts == expected_attempts));
    }
    assert!(listener.failed.lock().unwrap().is_empty());

    // "keep me" 恢复，"hello" 第三次失败
    delivery.accept("keep me");
    let report = queue.sync_pending_messages().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.pending_count().await, 0);
    assert_eq!(*listener.failed.lock().unwrap(), vec![(id, 3)]);
    // 成功通知每次同步最多一次
    assert_eq!(*listener.synced.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn storage_failure_keeps_the_message_in_memory() {
    let pool = create_sqlite_pool_with_migration("sqlite::memory:")
        .await
        .unwrap();
    let kv = KvStore::new(pool.clone());
    let mut last_try = PendingMessage::new(hello());
    last_try.attempts = 2;
    PendingQueueDao::new(kv.clone())
        .save(std::slice::from_ref(&last_try))
        .await
        .unwrap();

    let delivery = StubDelivery::accepting();
    delivery.reject("hello");
    let (queue, listener) = open_queue(&kv, delivery.clone(), true).await;

    // 第三次失败时写不进存储
    pool.close().await;
    let report = queue.sync_pending_messages().await.unwrap();
    assert_eq!(delivery.calls(), 1);
    assert_eq!(report.retained, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(queue.pending_messages().await, vec![last_try]);
    assert!(listener.failed.lock().unwrap().is_empty());

    // 入队同样不会留下未持久化的消息
    assert!(queue.queue_message(hello()).await.is_err());
    assert_eq!(queue.pending_count().await, 1);
    assert!(listener.queued.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_messages_stay_with_one_more_attempt_per_pass() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    let (queue, listener) = open_queue(&kv, delivery.clone(), true).await;
    delivery.reject("bad");

    let good_a = queue
        .queue_message(NewPendingMessage::user_text(Some("c1".into()), "good a", "m1"))
        .await
        .unwrap();
    let bad = queue
        .queue_message(NewPendingMessage::user_text(Some("c1".into()), "bad", "m1"))
        .await
        .unwrap();
    let good_b = queue
        .queue_message(NewPendingMessage::user_text(Some("c2".into()), "good b", "m1"))
        .await
        .unwrap();

    let report = queue.sync_pending_messages().await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            attempted: 3,
            delivered: 2,
            failed: 0,
            retained: 1,
            stale: 0,
            skipped: false,
        }
    );
    assert_eq!(delivery.delivered(), vec![good_a, good_b]);

    let pending = queue.pending_messages().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, bad);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(*listener.synced.lock().unwrap(), vec![2]);
    assert_eq!(listener.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stale_message_is_never_retried_automatically() {
    let kv = memory_kv().await;
    let mut stale = PendingMessage::new(hello());
    stale.attempts = 3;
    PendingQueueDao::new(kv.clone())
        .save(std::slice::from_ref(&stale))
        .await
        .unwrap();

    let delivery = StubDelivery::accepting();
    let (queue, _listener) = open_queue(&kv, delivery.clone(), true).await;

    let report = queue.sync_pending_messages().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(delivery.calls(), 0);
    assert_eq!(queue.stale_messages().await, vec![stale]);
}

#[tokio::test]
async fn retrying_a_stale_message_that_fails_removes_it() {
    let kv = memory_kv().await;
    let mut stale = PendingMessage::new(hello());
    stale.attempts = 3;
    PendingQueueDao::new(kv.clone())
        .save(std::slice::from_ref(&stale))
        .await
        .unwrap();

    let delivery = StubDelivery::accepting();
    delivery.reject("hello");
    let (queue, listener) = open_queue(&kv, delivery.clone(), true).await;

    assert!(!queue.retry_message(&stale.id).await.unwrap());
    assert_eq!(queue.pending_count().await, 0);
    assert_eq!(*listener.failed.lock().unwrap(), vec![(stale.id.clone(), 4)]);
    assert_eq!(delivery.calls(), 1);
}

#[tokio::test]
async fn manual_retry_delivers_stale_message() {
    let kv = memory_kv().await;
    let mut stale = PendingMessage::new(hello());
    stale.attempts = 5;
    PendingQueueDao::new(kv.clone())
        .save(std::slice::from_ref(&stale))
        .await
        .unwrap();

    let delivery = StubDelivery::accepting();
    let (queue, _listener) = open_queue(&kv, delivery.clone(), true).await;

    assert!(queue.retry_message(&stale.id).await.unwrap());
    assert!(queue.pending_messages().await.is_empty());
    assert_eq!(delivery.delivered(), vec![stale.id]);
}

#[tokio::test]
async fn retry_while_offline_does_not_consume_an_attempt() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    let (queue, _listener) = open_queue(&kv, delivery.clone(), false).await;
    let id = queue.queue_message(hello()).await.unwrap();

    assert!(!queue.retry_message(&id).await.unwrap());
    assert_eq!(queue.pending_messages().await[0].attempts, 0);
    assert_eq!(delivery.calls(), 0);
}

#[tokio::test]
async fn retry_of_unknown_message_is_not_found() {
    let kv = memory_kv().await;
    let (queue, _listener) = open_queue(&kv, StubDelivery::accepting(), true).await;

    let err = queue.retry_message("missing").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ChatError>(),
        Some(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_bulk_syncs_deliver_each_message_once() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::slow(Duration::from_millis(30));
    let (queue, _listener) = open_queue(&kv, delivery.clone(), true).await;
    for i in 0..3 {
        queue
            .queue_message(NewPendingMessage::user_text(None, format!("msg {}", i), "m1"))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(queue.sync_pending_messages(), queue.sync_pending_messages());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.skipped != b.skipped, "exactly one pass runs");
    assert_eq!(a.delivered + b.delivered, 3);
    assert_eq!(delivery.calls(), 3);
    assert_eq!(queue.pending_count().await, 0);
}

#[tokio::test]
async fn manual_retry_and_bulk_sync_never_double_deliver() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::slow(Duration::from_millis(30));
    let (queue, _listener) = open_queue(&kv, delivery.clone(), true).await;
    let id = queue.queue_message(hello()).await.unwrap();

    let (retried, report) = tokio::join!(queue.retry_message(&id), queue.sync_pending_messages());
    let retried = retried.unwrap();
    let report = report.unwrap();

    assert_eq!(delivery.delivered(), vec![id]);
    assert_eq!(delivery.calls(), 1);
    assert!(retried || report.delivered == 1);
    assert_eq!(queue.pending_count().await, 0);
}

#[tokio::test]
async fn queue_survives_reload_from_storage() {
    let kv = memory_kv().await;
    let (queue, _listener) = open_queue(&kv, StubDelivery::accepting(), false).await;
    queue.queue_message(hello()).await.unwrap();
    let mut with_options = NewPendingMessage::user_text(Some("c7".into()), "draw", "img");
    with_options.attachments = Some(vec![serde_json::json!({"name": "ref.png"})]);
    queue.queue_message(with_options).await.unwrap();
    let before = queue.pending_messages().await;

    let (reloaded, _listener) = open_queue(&kv, StubDelivery::accepting(), false).await;
    assert_eq!(reloaded.pending_messages().await, before);
}

#[tokio::test]
async fn corrupted_storage_starts_with_an_empty_queue() {
    let kv = memory_kv().await;
    kv.set(PENDING_MESSAGES_KEY, "{not json").await.unwrap();

    let (queue, _listener) = open_queue(&kv, StubDelivery::accepting(), true).await;
    assert_eq!(queue.pending_count().await, 0);
    assert_eq!(kv.get(PENDING_MESSAGES_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn going_offline_leaves_the_queue_untouched() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    let (queue, listener) = open_queue(&kv, delivery.clone(), true).await;
    delivery.reject("hello");
    let id = queue.queue_message(hello()).await.unwrap();

    assert!(queue.set_network_status(false).await.is_none());
    assert!(!queue.is_online());
    // 状态未变化时不做任何事
    assert!(queue.set_network_status(false).await.is_none());

    assert_eq!(queue.pending_messages().await[0].id, id);
    assert_eq!(delivery.calls(), 0);
    assert_eq!(*listener.network.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn discard_and_clear_update_storage() {
    let kv = memory_kv().await;
    let (queue, _listener) = open_queue(&kv, StubDelivery::accepting(), false).await;
    let first = queue.queue_message(hello()).await.unwrap();
    queue.queue_message(hello()).await.unwrap();
    queue.queue_message(hello()).await.unwrap();

    assert!(queue.discard_message(&first).await.unwrap());
    assert!(!queue.discard_message(&first).await.unwrap());
    let stored = PendingQueueDao::new(kv.clone()).load().await.unwrap();
    assert_eq!(stored.len(), 2);

    assert_eq!(queue.clear_queue().await.unwrap(), 2);
    assert_eq!(kv.get(PENDING_MESSAGES_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn background_sync_drains_queue_and_stops_on_signal() {
    let kv = memory_kv().await;
    let delivery = StubDelivery::accepting();
    let (queue, _listener) = open_queue(&kv, delivery.clone(), true).await;
    queue.queue_message(hello()).await.unwrap();

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = queue.start_background_sync(Duration::from_millis(20), shutdown_rx);

    tokio::time::timeout(Duration::from_secs(2), async {
        while queue.pending_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("background sync delivers the queued message");

    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop exits after shutdown")
        .unwrap();
    assert_eq!(delivery.calls(), 1);
}
