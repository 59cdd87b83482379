//! Benchmark record assembly and the benchmark file format.
//!
//! Records are collected stage outcome by stage outcome; only successes
//! are kept, the rest are counted in the [`AssemblyReport`]. The finished
//! set is written as pretty-printed JSON with a 4-space indent.

use std::collections::BTreeMap;
use std::path::Path;

use benchforge_shared::{
    Annotation, BenchError, BenchmarkFile, BenchmarkRecord, ExpectedBehavior, Level, RawItem,
    RecordInput, RecordMetadata, Result, StageOutcome,
};
use serde::Serialize;
use serde_json::Map;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info, instrument, warn};

/// Counts of what happened to every item offered to the assembler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub included: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl AssemblyReport {
    pub fn total(&self) -> usize {
        self.included + self.skipped + self.failed
    }
}

/// Shape of the file produced by an [`Assembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShape {
    /// `{"1": [...], "2": [...], "3": [...]}`, every level present.
    ByLevel,
    /// `[...]`
    Flat,
}

/// Collects records in arrival order.
#[derive(Debug)]
pub struct Assembler {
    shape: FileShape,
    records: Vec<BenchmarkRecord>,
    report: AssemblyReport,
}

impl Assembler {
    pub fn new(shape: FileShape) -> Self {
        Self {
            shape,
            records: Vec::new(),
            report: AssemblyReport::default(),
        }
    }

    /// Record one item's outcome. Only successes end up in the file.
    pub fn push(&mut self, question: &str, outcome: StageOutcome<BenchmarkRecord>) {
        match outcome {
            StageOutcome::Success(record) => {
                self.report.included += 1;
                self.records.push(record);
            }
            StageOutcome::Skipped(reason) => {
                self.report.skipped += 1;
                warn!(question = %preview(question), %reason, "item skipped");
            }
            StageOutcome::Failed(error) => {
                self.report.failed += 1;
                warn!(question = %preview(question), %error, "item failed");
            }
        }
    }

    pub fn finish(self) -> (BenchmarkFile, AssemblyReport) {
        let file = match self.shape {
            FileShape::Flat => BenchmarkFile::Flat(self.records),
            FileShape::ByLevel => {
                let mut levels: BTreeMap<Level, Vec<BenchmarkRecord>> =
                    Level::ALL.iter().map(|l| (*l, Vec::new())).collect();
                for record in self.records {
                    let level = record.metadata.level.unwrap_or(Level::One);
                    levels.entry(level).or_default().push(record);
                }
                BenchmarkFile::ByLevel(levels)
            }
        };
        (file, self.report)
    }
}

fn preview(question: &str) -> String {
    let mut short: String = question.chars().take(80).collect();
    if short.len() < question.len() {
        short.push_str("...");
    }
    short
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

/// Record for an item picked by capability similarity.
pub fn similarity_record(
    item: &RawItem,
    capability_id: &str,
    distance: f32,
    annotation: Annotation,
) -> BenchmarkRecord {
    BenchmarkRecord {
        input: RecordInput {
            question: item.question.clone(),
        },
        expected_output: item.final_answer.clone(),
        metadata: RecordMetadata {
            level: Some(item.level),
            capability: Some(capability_id.to_string()),
            distance: Some(distance),
            operation_type: None,
            max_number_detected: None,
            node_validation: Some(annotation),
            expected_behavior: ExpectedBehavior {
                golden_answer: item.final_answer.clone(),
                tone: None,
            },
            extra: Map::new(),
        },
    }
}

/// Record for an item picked by operation keyword and magnitude.
pub fn keyword_record(
    item: &RawItem,
    operation: &str,
    magnitude: f64,
    tone: &str,
    annotation: Option<Annotation>,
) -> BenchmarkRecord {
    BenchmarkRecord {
        input: RecordInput {
            question: item.question.clone(),
        },
        expected_output: item.final_answer.clone(),
        metadata: RecordMetadata {
            level: None,
            capability: None,
            distance: None,
            operation_type: Some(operation.to_string()),
            max_number_detected: Some(magnitude),
            node_validation: annotation,
            expected_behavior: ExpectedBehavior {
                golden_answer: item.final_answer.clone(),
                tone: Some(tone.to_string()),
            },
            extra: Map::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Serialize with a 4-space indent.
pub fn to_benchmark_json(file: &BenchmarkFile) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    file.serialize(&mut serializer)
        .map_err(|e| BenchError::validation(format!("JSON serialization failed: {e}")))?;
    String::from_utf8(buf).map_err(|e| BenchError::validation(e.to_string()))
}

/// Write a benchmark file atomically (temp file, then rename).
#[instrument(skip_all, fields(path = %path.display(), records = file.len()))]
pub fn write_benchmark(path: &Path, file: &BenchmarkFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
        }
    }

    let json = to_benchmark_json(file)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| BenchError::validation(format!("not a file path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    std::fs::write(&temp, json.as_bytes()).map_err(|e| BenchError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| BenchError::io(path, e))?;

    info!(records = file.len(), "benchmark file written");
    Ok(())
}

/// Read a benchmark file in either shape.
pub fn read_benchmark(path: &Path) -> Result<BenchmarkFile> {
    let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
    let file: BenchmarkFile = serde_json::from_str(&content)
        .map_err(|e| BenchError::parse(format!("invalid benchmark file {}: {e}", path.display())))?;
    debug!(path = %path.display(), records = file.len(), "benchmark file read");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("bf-assembler-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn raw(question: &str, level: Level) -> RawItem {
        RawItem {
            question: question.into(),
            final_answer: "500".into(),
            level,
            has_attached_file: false,
        }
    }

    fn annotation() -> Annotation {
        Annotation {
            plan: "p".into(),
            thought: "t".into(),
            action: "a".into(),
            observe: "o".into(),
            reflect: "r".into(),
        }
    }

    #[test]
    fn push_counts_outcomes() {
        let mut assembler = Assembler::new(FileShape::Flat);
        let item = raw("q", Level::One);
        assembler.push(
            "q",
            StageOutcome::Success(keyword_record(&item, "division", 9000.0, "calm", None)),
        );
        assembler.push("q", StageOutcome::Skipped("no JSON".into()));
        assembler.push("q", StageOutcome::Failed(BenchError::Network("down".into())));

        let (file, report) = assembler.finish();
        assert_eq!(
            report,
            AssemblyReport {
                included: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(report.total(), 3);
        assert_eq!(file.len(), 1);
    }

    #[test]
    fn by_level_file_has_every_level() {
        let mut assembler = Assembler::new(FileShape::ByLevel);
        let item = raw("q3", Level::Three);
        assembler.push(
            "q3",
            StageOutcome::Success(similarity_record(&item, "calculator", 0.3, annotation())),
        );

        let (file, _) = assembler.finish();
        let BenchmarkFile::ByLevel(levels) = &file else {
            panic!("expected by-level file");
        };
        assert_eq!(levels.len(), 3);
        assert!(levels[&Level::One].is_empty());
        assert_eq!(levels[&Level::Three].len(), 1);
    }

    #[test]
    fn keyword_record_shape() {
        let record = keyword_record(
            &raw("Divide 9000", Level::One),
            "division",
            9000.0,
            "professional and precise",
            None,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["metadata"]["operation_type"], "division");
        assert_eq!(value["metadata"]["expected_behavior"]["tone"], "professional and precise");
        assert!(value["metadata"].get("level").is_none());
        assert!(value["metadata"].get("node_validation").is_none());
    }

    #[test]
    fn write_uses_four_space_indent_and_reads_back() {
        let tmp = temp_dir();
        let path = tmp.join("nested").join("bench.json");

        let record = similarity_record(&raw("q1", Level::Two), "sql_trino", 0.5, annotation());
        let mut levels = BTreeMap::new();
        levels.insert(Level::One, vec![]);
        levels.insert(Level::Two, vec![record]);
        levels.insert(Level::Three, vec![]);
        let file = BenchmarkFile::ByLevel(levels);

        write_benchmark(&path, &file).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"1\": []"));
        assert!(!tmp.join("nested").join(".bench.json.tmp").exists());

        let back = read_benchmark(&path).unwrap();
        assert_eq!(back, file);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn flat_roundtrip_through_disk() {
        let tmp = temp_dir();
        let path = tmp.join("flat.json");
        let file = BenchmarkFile::Flat(vec![keyword_record(
            &raw("Divide 12,000 by 4", Level::One),
            "division",
            12000.0,
            "professional and precise",
            Some(annotation()),
        )]);

        write_benchmark(&path, &file).unwrap();
        assert_eq!(read_benchmark(&path).unwrap(), file);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn read_missing_and_malformed() {
        let tmp = temp_dir();
        let err = read_benchmark(&tmp.join("absent.json")).unwrap_err();
        assert!(matches!(err, BenchError::Io { .. }));

        let bad = tmp.join("bad.json");
        std::fs::write(&bad, "{\"1\": 42}").unwrap();
        assert!(matches!(
            read_benchmark(&bad).unwrap_err(),
            BenchError::Parse { .. }
        ));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
