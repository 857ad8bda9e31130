use crate::config::ApiConfig;
use crate::error::{Result, TransubError};
use crate::llm::LlmBackend;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    json_mode: bool,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: normalize_base_url(base_url),
            model: "gpt-4o-mini".to_string(),
            json_mode: false,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        let key = api
            .key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TransubError::Config("API key is not set".to_string()))?;
        Ok(Self::new(key, &api.base_url)
            .with_model(api.model.clone())
            .with_json_mode(api.llm_support_json)
            .with_timeout(Duration::from_secs(api.timeout_secs)))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the server for `response_format: json_object` on JSON prompts.
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Trim trailing slashes and make sure the API version segment is present.
fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.contains("/v1") || trimmed.contains("/v3") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    r#type: Option<String>,
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    async fn complete(&self, prompt: &str, json: bool) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: (json && self.json_mode).then_some(ResponseFormat {
                r#type: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(TransubError::Api(format!(
                    "Chat API error ({}): {} ({})",
                    status,
                    api_error.error.message,
                    api_error.error.r#type.unwrap_or_default()
                )));
            }
            return Err(TransubError::Api(format!(
                "Chat API error ({}): {}",
                status, body
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            TransubError::InvalidResponse(format!("Failed to parse chat response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransubError::InvalidResponse("Chat response had no content".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/"),
            "https://api.example.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com/v1/"),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn test_from_config_requires_key() {
        let api = ApiConfig::default();
        assert!(OpenAiClient::from_config(&api).is_err());

        let api = ApiConfig {
            key: Some("sk-test".into()),
            model: "my-model".into(),
            ..ApiConfig::default()
        };
        let client = OpenAiClient::from_config(&api).unwrap();
        assert_eq!(client.model(), "my-model");
    }
}
