//! 嵌入能力：文本 → 向量
//!
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点；HashEmbedder 为离线确定性实现
//! （特征哈希词袋 + L2 归一化），无 API Key 时与测试中使用。

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::LlmError;

/// 嵌入提供方：实现必须可被多会话并发只读共享
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// 模型名（日志用）
    fn model(&self) -> &str;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidRequest("empty embedding input".to_string()));
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| LlmError::ApiError("embedding response had no data".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// 特征哈希词袋嵌入：同词同桶，结果 L2 归一化，余弦相似度即词重叠程度
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// 同步计算（纯 CPU，无 IO）
    pub fn embed_now(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimensions];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            // 高位决定符号，降低碰撞带来的偏差
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if text.trim().is_empty() {
            return Err(LlmError::InvalidRequest("empty embedding input".to_string()));
        }
        Ok(self.embed_now(text))
    }

    fn model(&self) -> &str {
        "feature-hash"
    }
}

/// 小写、按非字母数字切分、去掉过短词与常见停用词
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    const STOPWORDS: &[&str] = &[
        "the", "and", "for", "with", "about", "from", "into", "that", "this", "are", "was", "its",
        "title", "author", "genre", "summary",
    ];
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let a = e.embed_now("Space exploration and rockets");
        let b = e.embed_now("space EXPLORATION and rockets");
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_overlap_scores_higher() {
        let e = HashEmbedder::default();
        let q = e.embed_now("space exploration");
        let related = e.embed_now("A crew sets out on deep space exploration beyond Mars");
        let unrelated = e.embed_now("Classic Italian recipes for pasta and bread");
        assert!(dot(&q, &related) > dot(&q, &unrelated));
    }

    #[tokio::test]
    async fn test_hash_embedder_rejects_empty() {
        let e = HashEmbedder::default();
        assert!(e.embed("   ").await.is_err());
    }
}
