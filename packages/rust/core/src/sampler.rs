//! Stratified selection of corpus items.
//!
//! Two ranking strategies are kept side by side:
//! - similarity: bucket by (level, nearest capability), keep the closest items
//! - keyword: bucket by operation label, keep the items with the largest numbers

use std::collections::HashMap;
use std::sync::LazyLock;

use benchforge_shared::{Embedder, Level, OperationRule, RawItem, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::classifier::CapabilityIndex;
use crate::pipeline::ProgressReporter;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,.]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Similarity-ranked
// ---------------------------------------------------------------------------

/// Items for one (level, capability) stratum, ascending by distance.
#[derive(Debug, Clone)]
pub struct SampledBucket {
    pub level: Level,
    pub capability_id: String,
    pub items: Vec<(RawItem, f32)>,
}

/// Output of [`sample_by_similarity`].
#[derive(Debug, Default)]
pub struct SimilaritySample {
    /// One bucket per (level, capability), level order then capability order.
    pub buckets: Vec<SampledBucket>,
    pub classified: usize,
    pub attached_skipped: usize,
    pub classify_failed: usize,
}

/// Classify every item without an attachment and keep the `quota` closest per stratum.
///
/// A non-fatal classification error drops that item. A fatal one (empty
/// index) aborts.
#[instrument(skip_all, fields(items = items.len(), quota))]
pub async fn sample_by_similarity<E: Embedder>(
    items: &[RawItem],
    index: &CapabilityIndex<'_, E>,
    quota: usize,
    progress: &dyn ProgressReporter,
) -> Result<SimilaritySample> {
    let mut sample = SimilaritySample::default();
    let mut strata: HashMap<(Level, String), Vec<(RawItem, f32)>> = HashMap::new();
    let total = items.len();

    for (i, item) in items.iter().enumerate() {
        progress.item_progress(i + 1, total, "classifying");
        if item.has_attached_file {
            sample.attached_skipped += 1;
            continue;
        }

        match index.classify(&item.question).await {
            Ok(result) => {
                sample.classified += 1;
                strata
                    .entry((item.level, result.capability_id))
                    .or_default()
                    .push((item.clone(), result.distance));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                sample.classify_failed += 1;
                warn!(error = %e, "classification failed, skipping item");
            }
        }
    }

    for level in Level::ALL {
        for descriptor in index.descriptors() {
            let mut bucket = strata
                .remove(&(level, descriptor.id.clone()))
                .unwrap_or_default();
            bucket.sort_by(|a, b| a.1.total_cmp(&b.1));
            bucket.truncate(quota);
            debug!(%level, capability = %descriptor.id, kept = bucket.len(), "bucket ranked");
            sample.buckets.push(SampledBucket {
                level,
                capability_id: descriptor.id.clone(),
                items: bucket,
            });
        }
    }

    info!(
        classified = sample.classified,
        attached_skipped = sample.attached_skipped,
        classify_failed = sample.classify_failed,
        "similarity sampling complete"
    );
    Ok(sample)
}

// ---------------------------------------------------------------------------
// Keyword + magnitude-ranked
// ---------------------------------------------------------------------------

/// Items for one operation label, descending by magnitude.
#[derive(Debug, Clone)]
pub struct OperationBucket {
    pub label: String,
    pub items: Vec<(RawItem, f64)>,
}

/// First rule with a keyword contained in the question, ignoring case.
///
/// Blank keywords never match.
pub fn assign_operation<'r>(question: &str, rules: &'r [OperationRule]) -> Option<&'r str> {
    let lowered = question.to_lowercase();
    rules
        .iter()
        .find(|rule| {
            rule.keywords.iter().any(|k| {
                !k.trim().is_empty() && lowered.contains(k.to_lowercase().as_str())
            })
        })
        .map(|rule| rule.label.as_str())
}

/// Largest number written in `text`, or `0.0` when there is none.
///
/// Trailing `.`/`,` are stripped and thousands separators removed; tokens
/// with more than one decimal point are ignored.
pub fn max_number(text: &str) -> f64 {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .fold(0.0, f64::max)
}

fn parse_number(token: &str) -> Option<f64> {
    let cleaned = token.trim_end_matches(['.', ',']).replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let digits_only = cleaned.replacen('.', "", 1);
    if digits_only.is_empty() || !digits_only.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

/// Bucket items by operation label and keep the `quota` with the largest
/// number above `threshold`. Buckets follow rule order.
#[instrument(skip_all, fields(items = items.len(), quota, threshold))]
pub fn sample_by_keyword(
    items: &[RawItem],
    rules: &[OperationRule],
    threshold: f64,
    quota: usize,
) -> Vec<OperationBucket> {
    let mut by_label: HashMap<&str, Vec<(RawItem, f64)>> = HashMap::new();
    let mut unlabeled = 0usize;
    let mut below_threshold = 0usize;

    for item in items.iter().filter(|item| !item.has_attached_file) {
        let Some(label) = assign_operation(&item.question, rules) else {
            unlabeled += 1;
            continue;
        };
        let magnitude = max_number(&item.question);
        if magnitude <= threshold {
            below_threshold += 1;
            continue;
        }
        by_label
            .entry(label)
            .or_default()
            .push((item.clone(), magnitude));
    }

    let buckets: Vec<OperationBucket> = rules
        .iter()
        .map(|rule| {
            let mut items = by_label.remove(rule.label.as_str()).unwrap_or_default();
            items.sort_by(|a, b| b.1.total_cmp(&a.1));
            items.truncate(quota);
            OperationBucket {
                label: rule.label.clone(),
                items,
            }
        })
        .collect();

    info!(
        unlabeled,
        below_threshold,
        selected = buckets.iter().map(|b| b.items.len()).sum::<usize>(),
        "keyword sampling complete"
    );
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::TableEmbedder;
    use crate::pipeline::SilentProgress;
    use benchforge_shared::{AppConfig, CapabilityConfig};

    fn item(question: &str, level: Level, attached: bool) -> RawItem {
        RawItem {
            question: question.into(),
            final_answer: "x".into(),
            level,
            has_attached_file: attached,
        }
    }

    fn rules() -> Vec<OperationRule> {
        AppConfig::default().operations
    }

    #[test]
    fn max_number_cases() {
        assert_eq!(max_number("over 5,000.00 units"), 5000.0);
        assert_eq!(max_number("It costs 250. Then 1,200, then 7."), 1200.0);
        assert_eq!(max_number("no digits here"), 0.0);
        assert_eq!(max_number("version 1.2.3 of 40"), 40.0);
        assert_eq!(max_number("just dots ... and commas ,,,"), 0.0);
        assert_eq!(max_number("12,345,678 people"), 12_345_678.0);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules();
        // "total" is addition, "divided by" is division; division is listed first.
        assert_eq!(
            assign_operation("The total 9000 divided by 3", &rules),
            Some("division")
        );
        assert_eq!(assign_operation("What is the SUM of 6000?", &rules), Some("addition"));
        assert_eq!(assign_operation("Name the capital", &rules), None);
    }

    #[test]
    fn configured_keywords_match_any_case() {
        let rules = vec![OperationRule {
            label: "percent".into(),
            keywords: vec!["Percent".into()],
        }];
        assert_eq!(
            assign_operation("What is 10 percent of 5000?", &rules),
            Some("percent")
        );
        assert_eq!(
            assign_operation("What is 10 PERCENT of 5000?", &rules),
            Some("percent")
        );
    }

    #[test]
    fn blank_keywords_never_match() {
        let rules = vec![OperationRule {
            label: "division".into(),
            keywords: vec!["divide".into(), " ".into(), String::new()],
        }];
        assert_eq!(assign_operation("Name the capital of France", &rules), None);
        assert_eq!(assign_operation("Divide 9000 by 3", &rules), Some("division"));
    }

    #[test]
    fn keyword_sampling_gates_sorts_and_caps() {
        let items = vec![
            item("Divide 6000 apples", Level::One, false),
            item("Divide 9000 apples", Level::One, false),
            item("Divide 7000 apples", Level::One, false),
            item("Divide 100 apples", Level::One, false),
            item("Divide 8000 apples", Level::One, true),
            item("Add 5000 and 1", Level::One, false),
            item("Add 5001 and 1", Level::One, false),
        ];
        let buckets = sample_by_keyword(&items, &rules(), 5000.0, 2);

        let labels: Vec<_> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(
            labels,
            ["division", "multiplication", "addition", "subtraction", "exponent"]
        );

        let division: Vec<_> = buckets[0].items.iter().map(|(_, m)| *m).collect();
        assert_eq!(division, [9000.0, 7000.0]);

        // 5000 is not strictly above the threshold.
        let addition: Vec<_> = buckets[2].items.iter().map(|(_, m)| *m).collect();
        assert_eq!(addition, [5001.0]);
        assert!(buckets[1].items.is_empty());
    }

    #[test]
    fn keyword_sort_is_stable() {
        let items = vec![
            item("first: divide 6000", Level::One, false),
            item("second: divide 6000", Level::One, false),
        ];
        let buckets = sample_by_keyword(&items, &rules(), 5000.0, 10);
        assert!(buckets[0].items[0].0.question.starts_with("first"));
    }

    #[tokio::test]
    async fn similarity_buckets_rank_and_exclude_attachments() {
        let embedder = TableEmbedder::with(&[
            ("reasoning", &[1.0, 0.0]),
            ("math", &[0.0, 1.0]),
            ("q-near", &[0.0, 0.9]),
            ("q-mid", &[0.0, 0.7]),
            ("q-far", &[0.0, 0.5]),
            ("q-logic", &[1.0, 0.1]),
            ("q-file", &[0.0, 1.0]),
            ("q-level2", &[0.0, 1.0]),
        ]);
        let caps = vec![
            CapabilityConfig {
                id: "direct_answer".into(),
                description: "reasoning".into(),
            },
            CapabilityConfig {
                id: "calculator".into(),
                description: "math".into(),
            },
        ];
        let index = CapabilityIndex::build(&embedder, &caps).await.unwrap();

        let items = vec![
            item("q-far", Level::One, false),
            item("q-near", Level::One, false),
            item("q-mid", Level::One, false),
            item("q-logic", Level::One, false),
            item("q-file", Level::One, true),
            item("q-level2", Level::Two, false),
            item("q-unknown", Level::Three, false),
        ];
        let sample = sample_by_similarity(&items, &index, 2, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(sample.buckets.len(), 6);
        assert_eq!(sample.attached_skipped, 1);
        assert_eq!(sample.classify_failed, 1);

        let l1_calc = &sample.buckets[1];
        assert_eq!((l1_calc.level, l1_calc.capability_id.as_str()), (Level::One, "calculator"));
        let questions: Vec<_> = l1_calc.items.iter().map(|(i, _)| i.question.as_str()).collect();
        assert_eq!(questions, ["q-near", "q-mid"]);
        assert!(l1_calc.items.windows(2).all(|w| w[0].1 <= w[1].1));

        assert_eq!(sample.buckets[0].items.len(), 1);
        assert_eq!(sample.buckets[3].items[0].0.question, "q-level2");
        assert!(sample.buckets[4].items.is_empty());
        assert!(
            sample
                .buckets
                .iter()
                .flat_map(|b| &b.items)
                .all(|(i, _)| !i.has_attached_file)
        );
    }
}
