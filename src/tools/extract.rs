//! 文件文本提取协作方
//!
//! 学习计划工具通过 TextExtractor 读取上传的大纲文件；默认实现只读取纯文本类文件，
//! PDF 等二进制格式由外部提取服务实现同一 trait 接入。

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("could not read {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// 读取 .txt / .md / 无扩展名文件
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "text"];

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let display = path.display().to_string();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if !TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return Err(ExtractError::Unsupported(ext.to_string()));
            }
        }
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractError::NotFound(display)),
            Err(e) => Err(ExtractError::Parse {
                path: display,
                reason: e.to_string(),
            }),
        }
    }
}
