//! Anthropic Messages API generator.
//!
//! Non-streaming `POST {api_base}/v1/messages`. Rate limiting (429),
//! overload (529), server errors and transport failures are reported as
//! transient so the retry layer can back off; every other failure is fatal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::{CoverError, CoverResult, GeneratorError};
use crate::domain::models::GeneratorConfig;
use crate::domain::ports::{GenerationRequest, Generator, GeneratorResponse};

const API_VERSION: &str = "2023-06-01";

/// Message role in the Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct Message {
    role: Role,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

/// [`Generator`] backed by the Anthropic Messages API.
pub struct AnthropicGenerator {
    config: GeneratorConfig,
    client: Client,
}

impl AnthropicGenerator {
    pub fn new(config: GeneratorConfig) -> CoverResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GeneratorError::Fatal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> Option<String> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

/// Map an unsuccessful HTTP status to a Generator error class.
fn classify(status: StatusCode, body: &str) -> GeneratorError {
    let message = format!("API error {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529 {
        GeneratorError::Transient(message)
    } else {
        GeneratorError::Fatal(message)
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> CoverResult<GeneratorResponse> {
        let api_key = self
            .api_key()
            .ok_or_else(|| GeneratorError::Fatal("ANTHROPIC_API_KEY not set".to_string()))?;

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &request.prompt.system,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::Text {
                    text: request.prompt.user.clone(),
                }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.api_base.trim_end_matches('/')))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Transient(format!("API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoverError::Generator(classify(status, &text)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Fatal(format!("failed to parse response: {e}")))?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        debug!(
            model = %self.config.model,
            prompt_tokens = parsed.usage.input_tokens,
            completion_tokens = parsed.usage.output_tokens,
            "generator call completed"
        );

        Ok(GeneratorResponse {
            content,
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GroupHash, PromptFingerprint};
    use crate::domain::ports::Prompt;

    fn generator(base: &str) -> AnthropicGenerator {
        AnthropicGenerator::new(GeneratorConfig {
            api_base: base.to_string(),
            api_key: Some("test-key".into()),
            request_timeout_secs: 5,
            ..GeneratorConfig::default()
        })
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            group: GroupHash::compute(b"s", b"t"),
            fingerprint: PromptFingerprint::of_bytes(b"p"),
            prompt: Prompt {
                system: "You write tests.".into(),
                user: "Cover calc.add".into(),
            },
        }
    }

    #[tokio::test]
    async fn returns_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"msg_1","type":"message","role":"assistant","model":"m",
                    "content":[{"type":"text","text":"def test_add(): assert add(1, 2) == 3"}],
                    "stop_reason":"end_turn","usage":{"input_tokens":12,"output_tokens":34}}"#,
            )
            .create_async()
            .await;

        let response = generator(&server.url()).generate(&request()).await.unwrap();
        assert_eq!(response.content, "def test_add(): assert add(1, 2) == 3");
        assert_eq!(response.prompt_tokens, 12);
        assert_eq!(response.completion_tokens, 34);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_and_overload_are_transient() {
        let mut server = mockito::Server::new_async().await;
        for status in [429, 529, 503] {
            let mock = server
                .mock("POST", "/v1/messages")
                .with_status(status)
                .with_body("slow down")
                .create_async()
                .await;
            let err = generator(&server.url()).generate(&request()).await.unwrap_err();
            assert!(
                matches!(err, CoverError::Generator(GeneratorError::Transient(_))),
                "status {status} gave {err:?}"
            );
            mock.remove_async().await;
        }
    }

    #[tokio::test]
    async fn client_errors_are_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body(r#"{"type":"error","error":{"type":"authentication_error"}}"#)
            .create_async()
            .await;
        let err = generator(&server.url()).generate(&request()).await.unwrap_err();
        assert!(matches!(err, CoverError::Generator(GeneratorError::Fatal(_))));
    }

    #[test]
    fn classification_table() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify(StatusCode::BAD_REQUEST, "").is_transient());
        assert!(!classify(StatusCode::NOT_FOUND, "").is_transient());
    }
}
