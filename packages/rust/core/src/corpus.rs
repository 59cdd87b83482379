//! Corpus loading from local exports and conversion into [`RawItem`]s.
//!
//! Local files may be a JSON array of rows or JSON Lines. Rows that do not
//! match the expected shape are skipped and logged at debug level.

use std::path::Path;
use std::sync::LazyLock;

use benchforge_shared::{BenchError, GaiaRow, Gsm8kRow, Level, RawItem, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

static GSM8K_ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"####\s?([\d,.]+)").expect("valid regex"));

/// Read rows from a JSON array or JSON Lines file.
pub fn load_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;

    let values: Vec<(usize, serde_json::Value)> = if content.trim_start().starts_with('[') {
        let array: Vec<serde_json::Value> = serde_json::from_str(&content).map_err(|e| {
            BenchError::parse(format!("invalid JSON array in {}: {e}", path.display()))
        })?;
        array.into_iter().enumerate().collect()
    } else {
        let mut values = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => values.push((idx, value)),
                Err(e) => debug!(line = idx + 1, error = %e, "skipping unparseable line"),
            }
        }
        values
    };

    let total = values.len();
    let rows: Vec<T> = values
        .into_iter()
        .filter_map(|(idx, value)| match serde_json::from_value(value) {
            Ok(row) => Some(row),
            Err(e) => {
                debug!(row = idx, error = %e, "skipping malformed row");
                None
            }
        })
        .collect();

    info!(path = %path.display(), rows = rows.len(), skipped = total - rows.len(), "corpus loaded");
    Ok(rows)
}

pub fn gaia_items(rows: Vec<GaiaRow>) -> Vec<RawItem> {
    rows.into_iter().map(RawItem::from).collect()
}

/// Final answer after the `####` marker, thousands separators removed.
pub fn gsm8k_final_answer(answer: &str) -> Option<String> {
    GSM8K_ANSWER_RE
        .captures(answer)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(',', ""))
        .filter(|a| !a.is_empty())
}

/// GSM8K rows as level-1 items. Rows without a final-answer marker are dropped.
pub fn gsm8k_items(rows: Vec<Gsm8kRow>) -> Vec<RawItem> {
    let total = rows.len();
    let items: Vec<RawItem> = rows
        .into_iter()
        .filter_map(|row| match gsm8k_final_answer(&row.answer) {
            Some(final_answer) => Some(RawItem {
                question: row.question,
                final_answer,
                level: Level::One,
                has_attached_file: false,
            }),
            None => {
                debug!(question = %row.question, "no final answer marker, dropping row");
                None
            }
        })
        .collect();
    debug!(total, kept = items.len(), "gsm8k rows converted");
    items
}

pub fn load_gaia(path: &Path) -> Result<Vec<RawItem>> {
    Ok(gaia_items(load_rows(path)?))
}

pub fn load_gsm8k(path: &Path) -> Result<Vec<RawItem>> {
    Ok(gsm8k_items(load_rows(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/corpus")
            .join(name)
    }

    #[test]
    fn final_answer_extraction() {
        assert_eq!(
            gsm8k_final_answer("She pays 3 * 4 = 12\n#### 1,250").as_deref(),
            Some("1250")
        );
        assert_eq!(gsm8k_final_answer("####72").as_deref(), Some("72"));
        assert_eq!(gsm8k_final_answer("no marker here"), None);
    }

    #[test]
    fn loads_gaia_fixture() {
        let items = load_gaia(&fixture("gaia_sample.jsonl")).unwrap();
        assert_eq!(items.len(), 6);
        assert!(items.iter().any(|i| i.has_attached_file));
        assert!(items.iter().any(|i| i.level == Level::Three));
    }

    #[test]
    fn loads_gsm8k_fixture() {
        let items = load_gsm8k(&fixture("gsm8k_sample.jsonl")).unwrap();
        // One fixture row has no #### marker.
        assert_eq!(items.len(), 7);
        assert!(items.iter().all(|i| i.level == Level::One));
        assert!(items.iter().all(|i| !i.final_answer.contains(',')));
    }

    #[test]
    fn json_array_with_bad_row() {
        let path = std::env::temp_dir().join(format!("bf_corpus_{}.json", Uuid::now_v7()));
        std::fs::write(
            &path,
            r#####"[
                {"question": "Add 6000 and 1", "answer": "#### 6001"},
                {"question": "missing answer"}
            ]"#####,
        )
        .unwrap();

        let rows: Vec<Gsm8kRow> = load_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_rows::<Gsm8kRow>(Path::new("/nonexistent/corpus.jsonl")).unwrap_err();
        assert!(matches!(err, BenchError::Io { .. }));
    }
}
