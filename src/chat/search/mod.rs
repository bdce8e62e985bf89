//! 本地检索模块
//!
//! 分词、打分、Markdown 预处理，以及独占索引的后台 worker。

pub mod index;
pub mod listener;
pub mod markdown;
pub mod tokenizer;
pub mod worker;

pub use index::{
    IndexStats, IndexableMessage, SearchHit, SearchIndex, SearchIndexEntry, DEFAULT_SEARCH_LIMIT,
};
pub use listener::{EmptySearchWorkerListener, SearchWorkerListener};
pub use markdown::{CodeBlock, MessageMetadata, ProcessPayload, ProcessedMessage};
pub use tokenizer::tokenize;
pub use worker::{
    IndexReceipt, SearchWorker, SearchWorkerHandle, WorkerPayload, WorkerReply,
    INDEX_PROGRESS_BATCH,
};
