//! OpenAI-compatible embeddings client.

use benchforge_shared::{BenchError, Embedder, EmbeddingConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{build_client, endpoint, error_body};

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs, None)?,
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = endpoint(&self.base_url, &["embeddings"])?;
        debug!(model = %self.model, inputs = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("embedding request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Embedding(format!("HTTP {status}: {detail}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BenchError::Embedding(format!("unreadable response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(BenchError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
