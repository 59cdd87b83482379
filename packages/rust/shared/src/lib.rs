//! Shared types, error model, configuration, and service seams for benchforge.
//!
//! This crate is the foundation depended on by all other benchforge crates.
//! It provides:
//! - [`BenchError`], the unified error type
//! - Domain types ([`RawItem`], [`BenchmarkRecord`], [`BenchmarkFile`], [`Annotation`])
//! - Configuration ([`AppConfig`], config loading and validation)
//! - Service traits ([`CompletionService`], [`Embedder`], [`DatasetStore`])

pub mod config;
pub mod error;
pub mod services;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnnotationConfig, AppConfig, CapabilityConfig, CompletionConfig, CorpusConfig,
    DatasetStoreConfig, DefaultsConfig, EmbeddingConfig, HubDatasetConfig, KeywordConfig,
    OperationRule, UploadTarget, config_dir, config_file_path, init_config, load_config,
    load_config_from, optional_secret, resolve_secret,
};
pub use error::{BenchError, Result};
pub use services::{CompletionService, DatasetStore, Embedder};
pub use types::{
    ANNOTATION_KEYS, Annotation, BenchmarkFile, BenchmarkRecord, CapabilityDescriptor,
    Classification, ExpectedBehavior, FlushReport, GaiaRow, Gsm8kRow, Level, RawItem,
    RecordInput, RecordMetadata, RemoteDataset, StageOutcome,
};
