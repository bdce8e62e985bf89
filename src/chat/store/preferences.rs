//! 用户偏好开关（存放在本地键值表，键名 `pref:{name}`）

use crate::chat::store::kv::KvStore;
use anyhow::Result;
use tracing::warn;

#[derive(Clone)]
pub struct PreferenceStore {
    kv: KvStore,
}

impl PreferenceStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn key(name: &str) -> String {
        format!("pref:{}", name)
    }

    /// 读取开关；不存在或无法解析时返回 `default`
    pub async fn get_flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.kv.get(&Self::key(name)).await? {
            Some(raw) => match raw.parse::<bool>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!("[Prefs] 偏好 {} 的值无法解析: {:?}，使用默认值", name, raw);
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    pub async fn set_flag(&self, name: &str, value: bool) -> Result<()> {
        self.kv.set(&Self::key(name), &value.to_string()).await
    }

    pub async fn clear_flag(&self, name: &str) -> Result<bool> {
        self.kv.remove(&Self::key(name)).await
    }
}
