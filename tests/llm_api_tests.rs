//! HTTP tests for the OpenAI-compatible chat client
//!
//! These run against a local wiremock server, so no real endpoint or key is needed.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use transub::llm::{LlmBackend, LlmCache, LlmClient, OpenAiClient};
use transub::TransubError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TrimReply {
    analysis: String,
    result: String,
}

fn chat_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new("test-key".to_string(), &server.uri()).with_model("test-model")
}

// ============================================================================
// Chat Completion Tests
// ============================================================================

mod chat_tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let reply = assert_ok!(client(&server).complete("Say hello", false).await);
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_json_mode_requests_json_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{}")))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server)
            .with_json_mode(true)
            .complete("Reply with JSON", true)
            .await;
        assert_ok!(reply);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).complete("hi", false).await.unwrap_err();
        assert!(matches!(err, TransubError::Api(_)));
        assert!(err.to_string().contains("Incorrect API key"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client(&server).complete("hi", false).await.unwrap_err();
        assert!(matches!(err, TransubError::InvalidResponse(_)));
    }
}

// ============================================================================
// Retry and Cache Tests
// ============================================================================

mod client_tests {
    use super::*;

    fn llm(server: &MockServer) -> LlmClient {
        LlmClient::new(Arc::new(client(server)))
            .with_retries(3)
            .with_retry_delay(Duration::ZERO)
    }

    fn accept(reply: &TrimReply) -> Result<(), String> {
        if reply.result.is_empty() {
            Err("empty result".to_string())
        } else {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "```json\n{\"analysis\": \"ok\", \"result\": \"short\"}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let reply: TrimReply = llm(&server).ask_json("trim this", "trim", accept).await.unwrap();
        assert_eq!(reply.result, "short");
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let result: transub::Result<TrimReply> = llm(&server).ask_json("trim this", "trim", accept).await;
        assert!(matches!(result, Err(TransubError::Api(_))));
    }

    #[tokio::test]
    async fn test_rejected_replies_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "{\"analysis\": \"nothing to cut\", \"result\": \"\"}",
            )))
            .expect(3)
            .mount(&server)
            .await;

        let result: transub::Result<TrimReply> = llm(&server).ask_json("trim this", "trim", accept).await;
        assert!(matches!(result, Err(TransubError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_cached_reply_skips_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "{\"analysis\": \"ok\", \"result\": \"short\"}",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(LlmCache::new(dir.path()));
        let first: TrimReply = llm(&server)
            .with_cache(cache.clone())
            .ask_json("trim this", "trim", accept)
            .await
            .unwrap();
        let second: TrimReply = llm(&server)
            .with_cache(cache.clone())
            .ask_json("trim this", "trim", accept)
            .await
            .unwrap();

        assert_eq!(first, second);
        let entries = cache.entries("trim").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].model, "test-model");
    }
}
