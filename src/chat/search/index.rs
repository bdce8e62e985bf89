//! 内存搜索索引
//!
//! 每条消息保存一份分词结果，查询时逐条打分。索引只存在于工作任务的生命周期内。

use crate::chat::search::tokenizer::tokenize;
use crate::chat::store::LocalMessage;
use crate::chat::types::MessageRole;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 默认返回条数上限
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

const EXACT_WEIGHT: f64 = 2.0;
const CONTAINS_WEIGHT: f64 = 1.0;
const PREFIX_WEIGHT: f64 = 1.5;

/// 待索引的消息
#[derive(Debug, Clone, PartialEq)]
pub struct IndexableMessage {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    pub chat_id: String,
    pub created_at: i64,
}

impl From<&LocalMessage> for IndexableMessage {
    fn from(msg: &LocalMessage) -> Self {
        Self {
            id: msg.id.clone(),
            content: msg.content.clone(),
            role: msg.role,
            chat_id: msg.chat_id.clone(),
            created_at: msg.created_at,
        }
    }
}

/// 索引条目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    pub chat_id: String,
    pub created_at: i64,
    pub tokens: Vec<String>,
}

impl From<IndexableMessage> for SearchIndexEntry {
    fn from(msg: IndexableMessage) -> Self {
        let tokens = tokenize(&msg.content);
        Self {
            id: msg.id,
            content: msg.content,
            role: msg.role,
            chat_id: msg.chat_id,
            created_at: msg.created_at,
            tokens,
        }
    }
}

/// 一条命中结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub entry: SearchIndexEntry,
    pub score: f64,
    /// 在内容中出现过的查询词（去重，按查询顺序）
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub documents: usize,
    pub tokens: usize,
    pub chats: usize,
}

/// 单条文档对一组查询词的得分
///
/// 每个查询词 `q`：`2 × q 在小写内容中的出现次数 + 1 × 包含 q 的词数 + 1.5 × 以 q 开头的词数`
pub fn score_document(content_lower: &str, tokens: &[String], query_tokens: &[String]) -> f64 {
    query_tokens
        .iter()
        .map(|q| {
            let exact = content_lower.matches(q.as_str()).count() as f64;
            let contains = tokens.iter().filter(|t| t.contains(q.as_str())).count() as f64;
            let prefix = tokens.iter().filter(|t| t.starts_with(q.as_str())).count() as f64;
            EXACT_WEIGHT * exact + CONTAINS_WEIGHT * contains + PREFIX_WEIGHT * prefix
        })
        .sum()
}

#[derive(Debug, Default)]
pub struct SearchIndex {
    entries: HashMap<String, SearchIndexEntry>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条消息，已存在同 ID 时替换；返回是否发生替换
    pub fn insert(&mut self, message: IndexableMessage) -> bool {
        let entry = SearchIndexEntry::from(message);
        self.entries.insert(entry.id.clone(), entry).is_some()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// 清空索引，返回清除的条数
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SearchIndexEntry> {
        self.entries.get(id)
    }

    pub fn search(&self, query: &str, chat_id: Option<&str>, limit: usize) -> Vec<SearchHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .filter(|entry| chat_id.map_or(true, |chat| entry.chat_id == chat))
            .filter_map(|entry| {
                let content_lower = entry.content.to_lowercase();
                let score = score_document(&content_lower, &entry.tokens, &query_tokens);
                if score <= 0.0 {
                    return None;
                }
                let mut seen = HashSet::new();
                let matches = query_tokens
                    .iter()
                    .filter(|q| content_lower.contains(q.as_str()) && seen.insert(q.as_str()))
                    .cloned()
                    .collect();
                Some(SearchHit {
                    entry: entry.clone(),
                    score,
                    matches,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(limit);
        hits
    }

    pub fn stats(&self) -> IndexStats {
        let chats: HashSet<&str> = self.entries.values().map(|e| e.chat_id.as_str()).collect();
        IndexStats {
            documents: self.entries.len(),
            tokens: self.entries.values().map(|e| e.tokens.len()).sum(),
            chats: chats.len(),
        }
    }
}
