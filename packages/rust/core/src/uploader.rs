//! Idempotent upload of benchmark files into a dataset store.
//!
//! A dataset that already holds items is never touched again, so rerunning
//! an upload cannot duplicate records.

use std::path::Path;

use benchforge_shared::{DatasetStore, Result, UploadTarget};
use tracing::{info, instrument, warn};

use crate::assembler::read_benchmark;
use crate::pipeline::ProgressReporter;

/// Progress is reported after this many inserted records.
pub const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The dataset already existed with items; nothing was sent.
    Skipped { existing_items: usize },
    /// Records were sent; `failed` were rejected on insert or on delivery.
    Uploaded { inserted: usize, failed: usize },
}

/// Result of one entry of [`upload_all`].
#[derive(Debug)]
pub struct DatasetUpload {
    pub dataset_name: String,
    pub result: Result<UploadOutcome>,
}

/// Upload one benchmark file as `dataset_name`.
///
/// A lookup failure is treated as "does not exist". If the file cannot be
/// read the dataset is left created and empty. Flush always runs; records it
/// reports as rejected on delivery count as failed. A flush error means the
/// store lost the whole batch and fails this dataset.
#[instrument(skip_all, fields(dataset = %dataset_name, path = %path.display()))]
pub async fn upload<S: DatasetStore>(
    store: &S,
    path: &Path,
    dataset_name: &str,
    progress: &dyn ProgressReporter,
) -> Result<UploadOutcome> {
    match store.get_dataset(dataset_name).await {
        Ok(Some(existing)) if existing.item_count > 0 => {
            info!(
                existing_items = existing.item_count,
                "dataset already populated, skipping"
            );
            return Ok(UploadOutcome::Skipped {
                existing_items: existing.item_count,
            });
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "dataset lookup failed, treating as absent"),
    }

    store.create_dataset(dataset_name).await?;
    info!("dataset ready");

    let records = read_benchmark(path)?.into_records();
    let total = records.len();
    info!(records = total, "benchmark file loaded");

    let mut accepted = 0usize;
    let mut failed = 0usize;
    for (i, record) in records.iter().enumerate() {
        match store.create_dataset_item(dataset_name, record).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                failed += 1;
                warn!(index = i, error = %e, "dataset item insert failed");
            }
        }
        if (i + 1) % PROGRESS_EVERY == 0 {
            info!(sent = i + 1, total, "upload progress");
            progress.item_progress(i + 1, total, dataset_name);
        }
    }

    let report = match store.flush().await {
        Ok(report) => report,
        Err(e) => {
            warn!(accepted, failed, error = %e, "flush failed");
            return Err(e);
        }
    };
    if report.rejected > 0 {
        warn!(rejected = report.rejected, "store rejected records on delivery");
    }
    let rejected = report.rejected.min(accepted);
    let inserted = accepted - rejected;
    let failed = failed + rejected;

    info!(inserted, failed, "upload complete");
    Ok(UploadOutcome::Uploaded { inserted, failed })
}

/// Upload every configured (dataset, file) pair. Failures stay per dataset.
pub async fn upload_all<S: DatasetStore>(
    store: &S,
    targets: &[UploadTarget],
    progress: &dyn ProgressReporter,
) -> Vec<DatasetUpload> {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        progress.phase(&format!("Uploading {}", target.dataset_name));
        let result = upload(store, Path::new(&target.file), &target.dataset_name, progress).await;
        if let Err(e) = &result {
            warn!(dataset = %target.dataset_name, error = %e, "dataset upload failed");
        }
        results.push(DatasetUpload {
            dataset_name: target.dataset_name.clone(),
            result,
        });
    }
    results
}
