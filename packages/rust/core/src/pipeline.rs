//! End-to-end benchmark builds: corpus items → selection → annotation → file.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use benchforge_shared::{
    CapabilityConfig, CompletionService, Embedder, OperationRule, RawItem, Result, StageOutcome,
};
use tracing::{info, instrument};

use crate::annotator::Annotator;
use crate::assembler::{
    AssemblyReport, Assembler, FileShape, keyword_record, similarity_record, write_benchmark,
};
use crate::classifier::CapabilityIndex;
use crate::sampler::{sample_by_keyword, sample_by_similarity};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as items move through the current phase.
    fn item_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}

/// Settings for [`build_similarity_benchmark`].
#[derive(Debug, Clone)]
pub struct SimilarityBuildConfig {
    pub capabilities: Vec<CapabilityConfig>,
    /// Maximum items per (level, capability).
    pub quota: usize,
    pub output: PathBuf,
}

/// Settings for [`build_keyword_benchmark`].
#[derive(Debug, Clone)]
pub struct KeywordBuildConfig {
    pub operations: Vec<OperationRule>,
    pub magnitude_threshold: f64,
    /// Maximum items per operation label.
    pub quota: usize,
    pub tone: String,
    pub output: PathBuf,
}

/// Summary of one benchmark build.
#[derive(Debug)]
pub struct BuildResult {
    pub output: PathBuf,
    /// Corpus items offered to the sampler.
    pub candidates: usize,
    /// Items that survived selection and went to annotation.
    pub selected: usize,
    pub report: AssemblyReport,
    pub elapsed: Duration,
}

/// Build a by-level benchmark from capability-similarity strata.
///
/// 1. Embed capability descriptors
/// 2. Classify and bucket each question
/// 3. Annotate every selected item
/// 4. Write the by-level file
#[instrument(skip_all, fields(items = items.len(), output = %config.output.display()))]
pub async fn build_similarity_benchmark<E: Embedder, C: CompletionService>(
    items: &[RawItem],
    embedder: &E,
    annotator: &Annotator<'_, C>,
    config: &SimilarityBuildConfig,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();

    progress.phase("Building capability index");
    let index = CapabilityIndex::build(embedder, &config.capabilities).await?;

    progress.phase("Classifying questions");
    let sample = sample_by_similarity(items, &index, config.quota, progress).await?;
    let selected: usize = sample.buckets.iter().map(|b| b.items.len()).sum();

    progress.phase("Annotating selected items");
    let mut assembler = Assembler::new(FileShape::ByLevel);
    let mut done = 0usize;
    for bucket in &sample.buckets {
        info!(
            level = %bucket.level,
            capability = %bucket.capability_id,
            count = bucket.items.len(),
            "annotating bucket"
        );
        for (item, distance) in &bucket.items {
            let outcome = annotator
                .annotate(&item.question)
                .await
                .map(|annotation| {
                    similarity_record(item, &bucket.capability_id, *distance, annotation)
                });
            assembler.push(&item.question, outcome);
            done += 1;
            progress.item_progress(done, selected, &bucket.capability_id);
        }
    }

    progress.phase("Writing benchmark file");
    let (file, report) = assembler.finish();
    write_benchmark(&config.output, &file)?;

    let result = BuildResult {
        output: config.output.clone(),
        candidates: items.len(),
        selected,
        report,
        elapsed: start.elapsed(),
    };
    info!(
        offered = report.total(),
        included = report.included,
        skipped = report.skipped,
        failed = report.failed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "similarity benchmark built"
    );
    Ok(result)
}

/// Build a flat benchmark from keyword + magnitude selection.
///
/// Annotation is optional here; without an annotator records carry no
/// `node_validation`.
#[instrument(skip_all, fields(items = items.len(), output = %config.output.display()))]
pub async fn build_keyword_benchmark<C: CompletionService>(
    items: &[RawItem],
    annotator: Option<&Annotator<'_, C>>,
    config: &KeywordBuildConfig,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();

    progress.phase("Selecting by operation and magnitude");
    let buckets = sample_by_keyword(
        items,
        &config.operations,
        config.magnitude_threshold,
        config.quota,
    );
    let selected: usize = buckets.iter().map(|b| b.items.len()).sum();

    progress.phase(if annotator.is_some() {
        "Annotating selected items"
    } else {
        "Assembling records"
    });
    let mut assembler = Assembler::new(FileShape::Flat);
    let mut done = 0usize;
    for bucket in &buckets {
        info!(operation = %bucket.label, count = bucket.items.len(), "assembling bucket");
        for (item, magnitude) in &bucket.items {
            let to_record = |annotation| {
                keyword_record(item, &bucket.label, *magnitude, &config.tone, annotation)
            };
            let outcome = match annotator {
                Some(annotator) => annotator.annotate(&item.question).await.map(Some),
                None => StageOutcome::Success(None),
            }
            .map(to_record);
            assembler.push(&item.question, outcome);
            done += 1;
            progress.item_progress(done, selected, &bucket.label);
        }
    }

    progress.phase("Writing benchmark file");
    let (file, report) = assembler.finish();
    write_benchmark(&config.output, &file)?;

    let result = BuildResult {
        output: config.output.clone(),
        candidates: items.len(),
        selected,
        report,
        elapsed: start.elapsed(),
    };
    info!(
        offered = report.total(),
        included = report.included,
        skipped = report.skipped,
        failed = report.failed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "keyword benchmark built"
    );
    Ok(result)
}
