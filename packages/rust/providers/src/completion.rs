//! OpenAI-compatible chat completion client (OpenRouter by default).

use benchforge_shared::{BenchError, CompletionConfig, CompletionService, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{build_client, endpoint, error_body};

/// Chat completions client. One user message in, raw text out.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
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

impl CompletionClient {
    pub fn from_config(config: &CompletionConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs, None)?,
            base_url: config.base_url.clone(),
            api_key,
        })
    }
}

impl CompletionService for CompletionClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = endpoint(&self.base_url, &["chat", "completions"])?;
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(%model, prompt_chars = prompt.len(), "sending completion request");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("completion request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Completion(format!("HTTP {status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BenchError::Completion(format!("unreadable response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BenchError::Completion("response has no message content".into()))
    }
}
