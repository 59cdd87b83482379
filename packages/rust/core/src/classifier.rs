//! Nearest-capability classification over an in-memory vector index.

use benchforge_shared::{
    BenchError, CapabilityConfig, CapabilityDescriptor, Classification, Embedder, Result,
};
use tracing::{debug, info, instrument};

/// Capability descriptors with their embeddings, queried by squared L2 distance.
pub struct CapabilityIndex<'e, E> {
    embedder: &'e E,
    descriptors: Vec<CapabilityDescriptor>,
}

impl<'e, E: Embedder> CapabilityIndex<'e, E> {
    pub fn new(embedder: &'e E) -> Self {
        Self {
            embedder,
            descriptors: Vec::new(),
        }
    }

    /// Embed every configured capability in one request.
    #[instrument(skip_all, fields(capabilities = capabilities.len()))]
    pub async fn build(embedder: &'e E, capabilities: &[CapabilityConfig]) -> Result<Self> {
        if capabilities.is_empty() {
            return Err(BenchError::config("capability index is empty"));
        }

        let texts: Vec<String> = capabilities.iter().map(|c| c.description.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;
        if embeddings.len() != capabilities.len() {
            return Err(BenchError::Embedding(format!(
                "expected {} capability embeddings, got {}",
                capabilities.len(),
                embeddings.len()
            )));
        }

        let descriptors = capabilities
            .iter()
            .zip(embeddings)
            .map(|(cap, embedding)| CapabilityDescriptor {
                id: cap.id.clone(),
                description: cap.description.clone(),
                embedding,
            })
            .collect();

        info!(capabilities = capabilities.len(), "capability index built");
        Ok(Self {
            embedder,
            descriptors,
        })
    }

    /// Add one capability. Re-adding an id replaces its descriptor.
    pub async fn add(&mut self, id: &str, text: &str) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::Embedding(format!("no embedding returned for '{id}'")))?;

        let descriptor = CapabilityDescriptor {
            id: id.to_string(),
            description: text.to_string(),
            embedding,
        };
        match self.descriptors.iter_mut().find(|d| d.id == id) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
        Ok(())
    }

    /// Descriptors in insertion order.
    pub fn descriptors(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The `top_k` nearest capabilities, ascending by distance.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<Classification>> {
        if self.descriptors.is_empty() {
            return Err(BenchError::config("capability index is empty"));
        }

        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::Embedding("no embedding returned for query".into()))?;

        let mut ranked = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            ranked.push(Classification {
                capability_id: descriptor.id.clone(),
                distance: squared_l2(&embedding, &descriptor.embedding)?,
            });
        }
        ranked.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.capability_id.cmp(&b.capability_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Nearest capability for a question.
    pub async fn classify(&self, question: &str) -> Result<Classification> {
        let nearest = self
            .query(question, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::config("capability index is empty"))?;
        debug!(capability = %nearest.capability_id, distance = nearest.distance, "classified");
        Ok(nearest)
    }
}

/// Squared Euclidean distance. Always `>= 0`.
pub fn squared_l2(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(BenchError::Embedding(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum())
}
