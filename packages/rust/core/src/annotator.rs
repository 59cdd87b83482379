//! Expected-trace annotation through a generative completion service.
//!
//! Each question gets one completion request. The response must contain a
//! JSON object with the five node keys; anything else skips the item.

use benchforge_shared::{Annotation, CompletionService, StageOutcome};
use benchforge_storage::Storage;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::node_prompts::NodePrompts;

/// Annotates questions with a fixed model and node prompt set.
pub struct Annotator<'a, C> {
    completion: &'a C,
    model: String,
    node_prompts_json: String,
    cache: Option<&'a Storage>,
}

impl<'a, C: CompletionService> Annotator<'a, C> {
    pub fn new(
        completion: &'a C,
        model: impl Into<String>,
        node_prompts: &NodePrompts,
    ) -> benchforge_shared::Result<Self> {
        Ok(Self {
            completion,
            model: model.into(),
            node_prompts_json: node_prompts.to_pretty_json()?,
            cache: None,
        })
    }

    /// Reuse successful annotations stored in `storage`.
    pub fn with_cache(mut self, storage: &'a Storage) -> Self {
        self.cache = Some(storage);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_prompt(&self, question: &str) -> String {
        format!(
            "You are writing reference traces for evaluating a reasoning agent. The agent runs \
             five nodes in sequence, each driven by the system prompt below.\n\
             \n\
             --- NODE PROMPTS ---\n\
             {prompts}\n\
             \n\
             --- QUESTION ---\n\
             {question}\n\
             \n\
             Describe what each node should produce while the agent answers this question. \
             Each node must build on the one before it; for example the action has to carry \
             out a step named in the plan.\n\
             \n\
             Reply with one raw JSON object and nothing else, without markdown fences or \
             commentary. Use exactly these keys: \"plan\", \"thought\", \"action\", \
             \"observe\", \"reflect\".",
            prompts = self.node_prompts_json,
        )
    }

    /// Annotate one question.
    ///
    /// Transport errors are `Failed`; unusable responses are `Skipped`.
    pub async fn annotate(&self, question: &str) -> StageOutcome<Annotation> {
        let prompt = self.build_prompt(question);
        let hash = prompt_hash(&prompt, &self.model);

        if let Some(annotation) = self.cached(&hash).await {
            debug!("annotation cache hit");
            return StageOutcome::Success(annotation);
        }

        let response = match self.completion.complete(&self.model, &prompt).await {
            Ok(text) => text,
            Err(e) => return StageOutcome::Failed(e),
        };

        match parse_annotation(&response) {
            Ok(annotation) => {
                self.store(&hash, &annotation).await;
                StageOutcome::Success(annotation)
            }
            Err(reason) => {
                let preview: String = response.chars().take(100).collect();
                debug!(%preview, "unusable annotation response");
                StageOutcome::Skipped(reason)
            }
        }
    }

    async fn cached(&self, hash: &str) -> Option<Annotation> {
        let storage = self.cache?;
        match storage.get_annotation_cache(hash, &self.model).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(annotation) => Some(annotation),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "annotation cache lookup failed");
                None
            }
        }
    }

    async fn store(&self, hash: &str, annotation: &Annotation) {
        let Some(storage) = self.cache else {
            return;
        };
        let json = match serde_json::to_string(annotation) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not serialize annotation for cache");
                return;
            }
        };
        if let Err(e) = storage.set_annotation_cache(hash, &self.model, &json).await {
            warn!(error = %e, "annotation cache write failed");
        }
    }
}

/// Cache key for a (prompt, model) pair.
fn prompt_hash(prompt: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The span from the first `{` to the last `}`, if both exist in that order.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extract and validate an annotation from raw model output.
///
/// The error is a human-readable reason for skipping the item.
pub fn parse_annotation(text: &str) -> Result<Annotation, String> {
    let object_text =
        extract_json_object(text.trim()).ok_or_else(|| "no JSON object in response".to_string())?;
    let value: serde_json::Value =
        serde_json::from_str(object_text).map_err(|e| format!("invalid JSON: {e}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;
    Annotation::from_object(object).map_err(|key| format!("missing key '{key}'"))
}
