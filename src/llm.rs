//! Language-model completion backends.
//!
//! [`CompletionBackend`] is the seam the responder talks to. The production
//! implementation, [`OpenAiChat`], speaks the OpenAI-compatible
//! `POST {base_url}/chat/completions` protocol, which also covers Ollama and
//! most self-hosted inference servers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

/// One completion call: a question plus retrieved context passages.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub context: Vec<String>,
    pub temperature: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("missing API key for {0}")]
    MissingApiKey(String),
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

/// Assemble the chat messages for a grounded question.
fn build_messages(request: &CompletionRequest) -> Vec<OpenAiMessage> {
    let mut user = String::new();
    if request.context.is_empty() {
        user.push_str("No passages from the document matched this question.\n\n");
    } else {
        user.push_str("Passages from the document:\n\n");
        for passage in &request.context {
            user.push_str(passage);
            user.push_str("\n\n");
        }
    }
    user.push_str("Question: ");
    user.push_str(&request.prompt);

    vec![
        OpenAiMessage {
            role: "system".to_string(),
            content: request.system.clone(),
        },
        OpenAiMessage {
            role: "user".to_string(),
            content: user,
        },
    ]
}

#[async_trait]
impl CompletionBackend for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if self.api_key.is_none() && self.base_url.contains("api.openai.com") {
            return Err(LlmError::MissingApiKey(self.base_url.clone()));
        }

        let body = OpenAiRequest {
            model: &self.model,
            messages: build_messages(request),
            temperature: request.temperature,
            stream: false,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let data: OpenAiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(context: Vec<&str>) -> CompletionRequest {
        CompletionRequest {
            system: "Answer from the passages.".to_string(),
            prompt: "What was net income?".to_string(),
            context: context.into_iter().map(String::from).collect(),
            temperature: 0.1,
        }
    }

    #[test]
    fn messages_include_context_then_question() {
        let messages = build_messages(&request(vec!["[1] (page 3) Net income was $4bn."]));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let user = &messages[1].content;
        let ctx_pos = user.find("Net income was $4bn.").unwrap();
        let q_pos = user.find("Question: What was net income?").unwrap();
        assert!(ctx_pos < q_pos);
    }

    #[test]
    fn messages_note_missing_context() {
        let messages = build_messages(&request(vec![]));
        assert!(messages[1].content.contains("No passages"));
    }

    #[test]
    fn request_serializes_temperature() {
        let body = OpenAiRequest {
            model: "m",
            messages: build_messages(&request(vec![])),
            temperature: 0.1,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!((json["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn hosted_api_without_key_fails_before_network() {
        let backend = OpenAiChat::new(&LlmConfig::default()).unwrap();
        let err = backend.complete(&request(vec![])).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey(_)));
    }

    #[test]
    fn parses_response_shape() {
        let data: OpenAiResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Four billion."}}]}"#,
        )
        .unwrap();
        assert_eq!(
            data.choices[0].message.content.as_deref(),
            Some("Four billion.")
        );
    }
}
