//! HTTP clients for the services benchforge talks to.
//!
//! - [`CompletionClient`]: OpenAI-compatible chat completions (annotation)
//! - [`EmbeddingClient`]: OpenAI-compatible embeddings (classification)
//! - [`LangfuseClient`]: Langfuse public API as a [`DatasetStore`]
//! - [`HubClient`]: Hugging Face datasets-server rows (corpus download)
//!
//! [`DatasetStore`]: benchforge_shared::DatasetStore

mod completion;
mod embedding;
mod hub;
mod langfuse;

use std::path::Path;
use std::time::Duration;

use benchforge_shared::{BenchError, Result};
use reqwest::Client;
use url::Url;

pub use completion::CompletionClient;
pub use embedding::EmbeddingClient;
pub use hub::{HubClient, ROWS_PAGE_SIZE};
pub use langfuse::{LangfuseClient, LangfuseCredentials};

/// User-Agent string for all outbound requests.
const USER_AGENT: &str = concat!("benchforge/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the shared settings.
///
/// `ca_bundle` is a PEM file added to the trusted roots, for installs
/// behind a private certificate authority.
pub fn build_client(timeout_secs: u64, ca_bundle: Option<&Path>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs));

    if let Some(path) = ca_bundle {
        let pem = std::fs::read(path).map_err(|e| BenchError::io(path, e))?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            BenchError::config(format!("invalid CA bundle {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "trusting custom CA bundle");
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| BenchError::Network(format!("failed to build HTTP client: {e}")))
}

/// Parse a configured base URL, appending `segments` to its path.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| BenchError::config(format!("invalid base URL '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| BenchError::config(format!("base URL '{base}' cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Read an error response body for diagnostics, truncated.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let mut body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".into());
    if body.len() > 500 {
        let mut cut = 500;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_segments() {
        let url = endpoint("https://openrouter.ai/api/v1", &["chat", "completions"]).unwrap();
        assert_eq!(url.as_str(), "https://openrouter.ai/api/v1/chat/completions");

        let url = endpoint("http://localhost:3000/", &["api", "public", "v2", "datasets"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/public/v2/datasets");
    }

    #[test]
    fn endpoint_encodes_names() {
        let url = endpoint("http://localhost:3000", &["datasets", "GSM8K Math/v1"]).unwrap();
        assert_eq!(url.path(), "/datasets/GSM8K%20Math%2Fv1");
    }

    #[test]
    fn endpoint_rejects_garbage() {
        let err = endpoint("not a url", &["x"]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_ca_bundle_is_io_error() {
        let err = build_client(10, Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(matches!(err, BenchError::Io { .. }));
    }
}
