//! 本地数据订阅（live query）
//!
//! 按查询键注册回调，数据变化时回调被调用，组件销毁时注销。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// 会话列表的订阅键
pub const CONVERSATIONS_KEY: &str = "conversations";

/// 某个会话消息列表的订阅键
pub fn messages_key(chat_id: &str) -> String {
    format!("messages:{}", chat_id)
}

/// 订阅回调，参数为发生变化的查询键
pub type SubscriptionCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, SubscriptionCallback)>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: &str, callback: SubscriptionCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push((id, callback));
        debug!("[Subscription] 注册订阅 {:?} -> {}", id, key);
        id
    }

    /// 注销订阅，返回是否存在该订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        subscribers.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(sid, _)| *sid != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        removed
    }

    /// 通知某个键的所有订阅者
    ///
    /// 回调在锁外执行，回调内部可以再次订阅或注销。
    pub fn notify(&self, key: &str) {
        let callbacks: Vec<SubscriptionCallback> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(key) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        debug!("[Subscription] 通知 {} 个订阅者: {}", callbacks.len(), key);
        for callback in callbacks {
            callback(key);
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}
