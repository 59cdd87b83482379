//! Benchmark construction pipeline for benchforge.
//!
//! Ties together corpus loading, capability classification, stratified
//! sampling, annotation, file assembly, and dataset upload.

pub mod annotator;
pub mod assembler;
pub mod classifier;
pub mod corpus;
pub mod node_prompts;
pub mod pipeline;
pub mod sampler;
pub mod uploader;
