//! 消息预处理：Markdown 渲染、代码块提取、元数据统计

use crate::chat::search::tokenizer::tokenize;
use crate::chat::types::MessageRole;
use anyhow::{Context, Result};
use comrak::{format_html, parse_document, Arena, Options};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::warn;

/// 未标注语言的代码块使用的语言名
pub const PLAIN_CODE_LANGUAGE: &str = "text";

static MARKDOWN_OPTIONS: LazyLock<Options> = LazyLock::new(|| {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.tasklist = true;
    options.extension.autolink = true;
    options
});

static FENCED_CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("fenced code block pattern is valid")
});

/// 预处理请求
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessPayload {
    pub content: String,
    pub role: MessageRole,
    pub attachments: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub word_count: usize,
    pub has_code: bool,
    pub has_attachments: bool,
    pub languages: BTreeSet<String>,
}

/// 预处理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    /// 仅助手消息渲染 HTML；渲染失败时为原始内容
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub code_blocks: Vec<CodeBlock>,
    pub metadata: MessageMetadata,
    pub tokens: Vec<String>,
}

pub fn render_markdown(content: &str) -> Result<String> {
    let arena = Arena::new();
    let root = parse_document(&arena, content, &MARKDOWN_OPTIONS);
    let mut html = Vec::new();
    format_html(root, &MARKDOWN_OPTIONS, &mut html).context("渲染 Markdown 失败")?;
    String::from_utf8(html).context("Markdown 渲染结果不是合法 UTF-8")
}

/// 提取 ``` 包围的代码块
pub fn extract_code_blocks(content: &str) -> Vec<CodeBlock> {
    FENCED_CODE_BLOCK
        .captures_iter(content)
        .map(|caps| {
            let language = caps.get(1).map_or("", |m| m.as_str().trim());
            CodeBlock {
                language: if language.is_empty() {
                    PLAIN_CODE_LANGUAGE.to_string()
                } else {
                    language.to_lowercase()
                },
                code: caps
                    .get(2)
                    .map_or("", |m| m.as_str())
                    .trim_end_matches('\n')
                    .to_string(),
            }
        })
        .collect()
}

pub fn process_message(payload: &ProcessPayload) -> ProcessedMessage {
    let (html, code_blocks) = if payload.role == MessageRole::Assistant {
        let html = render_markdown(&payload.content).unwrap_or_else(|e| {
            warn!("[SearchWorker] Markdown 渲染失败，返回原文: {:?}", e);
            payload.content.clone()
        });
        (Some(html), extract_code_blocks(&payload.content))
    } else {
        (None, Vec::new())
    };

    let metadata = MessageMetadata {
        word_count: payload.content.split_whitespace().count(),
        has_code: !code_blocks.is_empty(),
        has_attachments: payload.attachments.as_ref().is_some_and(|a| !a.is_empty()),
        languages: code_blocks.iter().map(|b| b.language.clone()).collect(),
    };

    ProcessedMessage {
        html,
        code_blocks,
        metadata,
        tokens: tokenize(&payload.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "Here is how:\n\n```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n\nand a shell step:\n\n```\ncargo run\n```\n";

    #[test]
    fn extracts_language_and_body() {
        let blocks = extract_code_blocks(ANSWER);
        assert_eq!(
            blocks,
            vec![
                CodeBlock {
                    language: "rust".into(),
                    code: "fn main() {\n    println!(\"hi\");\n}".into(),
                },
                CodeBlock {
                    language: PLAIN_CODE_LANGUAGE.into(),
                    code: "cargo run".into(),
                },
            ]
        );
    }

    #[test]
    fn renders_markdown_to_html() {
        let html = render_markdown("# Title\n\n**bold** text").unwrap();
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn assistant_message_gets_html_and_metadata() {
        let processed = process_message(&ProcessPayload {
            content: ANSWER.into(),
            role: MessageRole::Assistant,
            attachments: None,
        });
        let html = processed.html.unwrap();
        assert!(html.contains("<code class=\"language-rust\">"));
        assert!(processed.metadata.has_code);
        assert!(!processed.metadata.has_attachments);
        assert_eq!(
            processed.metadata.languages.into_iter().collect::<Vec<_>>(),
            vec!["rust".to_string(), "text".to_string()]
        );
        assert!(processed.tokens.contains(&"cargo".to_string()));
    }

    #[test]
    fn user_message_is_only_tokenized() {
        let processed = process_message(&ProcessPayload {
            content: "```rust\nlet x = 1;\n``` please explain".into(),
            role: MessageRole::User,
            attachments: Some(vec![serde_json::json!({"name": "a.png"})]),
        });
        assert!(processed.html.is_none());
        assert!(processed.code_blocks.is_empty());
        assert!(!processed.metadata.has_code);
        assert!(processed.metadata.has_attachments);
        assert_eq!(processed.metadata.word_count, 8);
        assert_eq!(processed.tokens, vec!["rust", "please", "explain"]);
    }
}
