//! OpenAI-compatible chat-completions provider
//!
//! Recognition sends the page image as a base64 data URL next to the
//! configured prompt; transformation sends the instruction as the system
//! message and the page text as the user message.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::traits::{ImageArtifact, RecognitionProvider, TextTransformProvider};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// Longest response body kept in an [`Error::Http`] message
const MAX_ERROR_BODY: usize = 512;

/// Provider backed by an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone, Debug)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    endpoint: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    /// Build a provider from its configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be constructed.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Send one chat-completions request and return the first choice's text
    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ChatRequest { model, messages });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut message = if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Other(format!("{model} returned an empty completion")))
    }
}

#[async_trait]
impl RecognitionProvider for OpenAiProvider {
    async fn recognize(&self, image: &ImageArtifact) -> Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            image.mime_type,
            STANDARD.encode(&image.data)
        );
        let messages = vec![ChatMessage {
            role: "user",
            content: json!([
                { "type": "text", "text": self.config.recognition_prompt },
                { "type": "image_url", "image_url": { "url": data_url } },
            ]),
        }];

        tracing::debug!(
            page = image.page.get(),
            bytes = image.data.len(),
            model = %self.config.recognition_model,
            "sending recognition request"
        );

        self.complete(&self.config.recognition_model, messages)
            .await
            .map_err(|e| match e {
                Error::Other(reason) => Error::Recognition {
                    page: image.page.get(),
                    reason,
                },
                other => other,
            })
    }

    fn name(&self) -> &str {
        &self.config.recognition_model
    }
}

#[async_trait]
impl TextTransformProvider for OpenAiProvider {
    async fn transform(&self, text: &str, instruction: &str) -> Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: Value::String(instruction.to_string()),
            },
            ChatMessage {
                role: "user",
                content: Value::String(text.to_string()),
            },
        ];

        tracing::debug!(
            chars = text.len(),
            model = %self.config.transform_model,
            "sending transform request"
        );

        self.complete(&self.config.transform_model, messages).await
    }

    fn name(&self) -> &str {
        &self.config.transform_model
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::IsRetryable;
    use crate::types::PageId;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(ProviderConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        }))
    }

    #[tokio::test]
    async fn recognize_sends_image_as_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text" },
                        { "type": "image_url", "image_url": { "url": "data:image/png;base64,AQID" } }
                    ]
                }]
            })))
            .respond_with(completion("  Hello page  \n"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let text = provider
            .recognize(&ImageArtifact::png(PageId(1), vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(text, "Hello page");
    }

    #[tokio::test]
    async fn transform_sends_instruction_as_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "system", "content": "Translate to French" },
                    { "role": "user", "content": "Good morning" }
                ]
            })))
            .respond_with(completion("Bonjour"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let text = provider
            .transform("Good morning", "Translate to French")
            .await
            .unwrap();

        assert_eq!(text, "Bonjour");
    }

    #[tokio::test]
    async fn server_error_is_retryable_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .transform("text", "summarize")
            .await
            .unwrap_err();

        match &err {
            Error::Http { status, message } => {
                assert_eq!(*status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .recognize(&ImageArtifact::png(PageId(2), vec![0]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http { status: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_completion_is_a_recognition_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .recognize(&ImageArtifact::png(PageId(5), vec![0]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Recognition { page: 5, .. }));
        assert!(!err.is_retryable());
    }
}
