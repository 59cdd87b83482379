//! Client seams for the external services the pipeline talks to.
//!
//! Concrete HTTP and libSQL implementations live in `benchforge-providers`
//! and `benchforge-storage`; tests substitute in-memory fakes.

use std::future::Future;

use crate::error::Result;
use crate::types::{BenchmarkRecord, FlushReport, RemoteDataset};

/// A generative text completion endpoint.
pub trait CompletionService: Send + Sync {
    /// Send a single prompt and return the raw response text.
    fn complete(&self, model: &str, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// A text embedding endpoint.
pub trait Embedder: Send + Sync {
    /// Embed each input text. The output has one vector per input, in order.
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

/// A versioned dataset store (e.g. Langfuse).
///
/// Item inserts may be buffered; only [`DatasetStore::flush`] guarantees
/// that every accepted item has reached the store.
pub trait DatasetStore: Send + Sync {
    /// Look up a dataset by name. `Ok(None)` when it does not exist.
    fn get_dataset(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<RemoteDataset>>> + Send;

    /// Create an empty dataset.
    fn create_dataset(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Append one record to a dataset.
    ///
    /// `Ok` means the record was accepted; a buffering store may still
    /// reject it on delivery, which the next flush reports.
    fn create_dataset_item(
        &self,
        dataset_name: &str,
        record: &BenchmarkRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Drain any buffered writes and report every delivery since the last
    /// flush. `Err` means the store lost the whole pending batch.
    fn flush(&self) -> impl Future<Output = Result<FlushReport>> + Send;
}
