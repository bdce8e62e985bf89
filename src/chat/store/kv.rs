//! 本地键值存储（`local_kv` 表）

use crate::chat::serialization::now_millis;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

#[derive(Clone)]
pub struct KvStore {
    db: Pool<Sqlite>,
}

impl KvStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("读取键值失败: {}", key))?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value")?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_kv (key, value, update_time) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, update_time = excluded.update_time
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(&self.db)
        .await
        .with_context(|| format!("写入键值失败: {}", key))?;
        debug!("[LocalKV] 写入 {} ({} 字节)", key, value.len());
        Ok(())
    }

    /// 删除键，返回是否存在
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM local_kv WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除键值失败: {}", key))?;
        Ok(res.rows_affected() > 0)
    }
}
