//! Core domain types for benchforge benchmarks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BenchError, Result};

/// The five fields every node annotation must carry, in prompt order.
pub const ANNOTATION_KEYS: [&str; 5] = ["plan", "thought", "action", "observe", "reflect"];

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

/// GAIA difficulty tier.
///
/// Serialized as the strings `"1"`, `"2"`, `"3"`; deserialized from either
/// strings or bare numbers because corpus exports disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "LevelRepr", into = "String")]
pub enum Level {
    One,
    Two,
    Three,
}

impl Level {
    /// All levels in ascending order.
    pub const ALL: [Level; 3] = [Level::One, Level::Two, Level::Three];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
            Self::Three => "3",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(Self::One),
            "2" => Ok(Self::Two),
            "3" => Ok(Self::Three),
            other => Err(BenchError::parse(format!("unknown level: {other:?}"))),
        }
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<LevelRepr> for Level {
    type Error = String;

    fn try_from(repr: LevelRepr) -> std::result::Result<Self, Self::Error> {
        let text = match repr {
            LevelRepr::Number(n) => n.to_string(),
            LevelRepr::Text(s) => s,
        };
        text.parse::<Level>().map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Corpus items
// ---------------------------------------------------------------------------

/// A question as fetched from a public QA corpus. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub question: String,
    pub final_answer: String,
    pub level: Level,
    pub has_attached_file: bool,
}

/// A GAIA row as published on the Hugging Face hub.
#[derive(Debug, Clone, Deserialize)]
pub struct GaiaRow {
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Final answer")]
    pub final_answer: String,
    #[serde(rename = "Level")]
    pub level: Level,
    /// Empty (or missing) when the question has no attachment.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl From<GaiaRow> for RawItem {
    fn from(row: GaiaRow) -> Self {
        let has_attached_file = row
            .file_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        Self {
            question: row.question,
            final_answer: row.final_answer,
            level: row.level,
            has_attached_file,
        }
    }
}

/// A GSM8K row: the final answer is buried after a `####` marker in `answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct Gsm8kRow {
    pub question: String,
    pub answer: String,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A capability (tool) the agent under test can invoke, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub description: String,
    pub embedding: Vec<f32>,
}

/// Nearest capability for a question. Lower distance means a closer match.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub capability_id: String,
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// Expected intermediate reasoning for one question, one value per agent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub plan: Value,
    pub thought: Value,
    pub action: Value,
    pub observe: Value,
    pub reflect: Value,
}

impl Annotation {
    /// Build an annotation from a parsed JSON object.
    ///
    /// Returns the first missing key on failure. Keys beyond the required five
    /// are dropped.
    pub fn from_object(object: &Map<String, Value>) -> std::result::Result<Self, &'static str> {
        let take = |key: &'static str| object.get(key).cloned().ok_or(key);
        Ok(Self {
            plan: take("plan")?,
            thought: take("thought")?,
            action: take("action")?,
            observe: take("observe")?,
            reflect: take("reflect")?,
        })
    }
}

// ---------------------------------------------------------------------------
// BenchmarkRecord
// ---------------------------------------------------------------------------

/// The `input` payload of a benchmark record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInput {
    pub question: String,
}

/// Ground truth the evaluated agent is scored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedBehavior {
    pub golden_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// Per-record metadata. Which optional fields are present depends on the
/// selection variant that produced the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    /// Capability chosen by nearest-neighbor classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Operation label chosen by keyword matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_number_detected: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_validation: Option<Annotation>,
    pub expected_behavior: ExpectedBehavior,
    /// Fields this version does not model, kept as read.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One benchmark entry: the unit written to file and uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub input: RecordInput,
    pub expected_output: String,
    pub metadata: RecordMetadata,
}

// ---------------------------------------------------------------------------
// BenchmarkFile
// ---------------------------------------------------------------------------

/// The serialized hand-off between assembly and upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BenchmarkFile {
    /// `{"1": [...], "2": [...], "3": [...]}`
    ByLevel(BTreeMap<Level, Vec<BenchmarkRecord>>),
    /// `[...]`
    Flat(Vec<BenchmarkRecord>),
}

impl BenchmarkFile {
    /// Consume the file into its records, in file order (levels ascending
    /// for the by-level shape).
    pub fn into_records(self) -> Vec<BenchmarkRecord> {
        match self {
            Self::ByLevel(levels) => levels.into_values().flatten().collect(),
            Self::Flat(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::ByLevel(levels) => levels.values().map(Vec::len).sum(),
            Self::Flat(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Remote datasets
// ---------------------------------------------------------------------------

/// A named dataset as seen by a dataset store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataset {
    pub name: String,
    pub item_count: usize,
}

/// Deliveries made by a [`crate::DatasetStore`] since its previous flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Accepted records the store confirmed.
    pub delivered: usize,
    /// Accepted records the store rejected on delivery.
    pub rejected: usize,
}

// ---------------------------------------------------------------------------
// StageOutcome
// ---------------------------------------------------------------------------

/// Result of one pipeline stage for one item.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Success(T),
    /// The item was deliberately left out (e.g. malformed model output).
    Skipped(String),
    /// The stage could not run (e.g. transport error).
    Failed(BenchError),
}

impl<T> StageOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Success(value) => StageOutcome::Success(f(value)),
            Self::Skipped(reason) => StageOutcome::Skipped(reason),
            Self::Failed(error) => StageOutcome::Failed(error),
        }
    }
}
