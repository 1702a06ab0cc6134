//! Groq API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.groq.com/openai/v1
//! - 模型: llama-3.3-70b-versatile（推理与主题抽取）, llama-3.1-8b-instant（摘要）

use crate::llm::OpenAiClient;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_VERSATILE: &str = "llama-3.3-70b-versatile";
pub const GROQ_INSTANT: &str = "llama-3.1-8b-instant";

/// 创建 Groq 客户端
///
/// - 优先使用环境变量 `GROQ_API_KEY`，其次 `OPENAI_API_KEY`
/// - 模型可通过 `model` 参数或 `GROQ_MODEL` 环境变量指定
/// - `base_url` 未设置时使用 GROQ_BASE_URL（可指向代理或兼容网关）
pub fn create_groq_client(base_url: Option<&str>, model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("GROQ_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("GROQ_MODEL").ok())
        .unwrap_or_else(|| GROQ_VERSATILE.to_string());

    OpenAiClient::new(Some(base_url.unwrap_or(GROQ_BASE_URL)), &model, Some(api_key.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_url_and_model() {
        let client = create_groq_client(None, Some(GROQ_INSTANT));
        assert_eq!(client.base_url(), GROQ_BASE_URL);
        assert_eq!(client.model(), GROQ_INSTANT);
    }

    #[test]
    fn test_base_url_override() {
        let client = create_groq_client(Some("http://localhost:8080/v1"), Some(GROQ_VERSATILE));
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_temperature_defaults_to_zero() {
        let client = create_groq_client(None, None);
        assert_eq!(client.temperature(), 0.0);
        assert_eq!(client.with_temperature(0.2).temperature(), 0.2);
    }
}
