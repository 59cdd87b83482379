//! System prompts of the agent nodes, embedded in annotation requests.

use std::path::Path;

use benchforge_shared::{BenchError, Result};
use serde::{Deserialize, Serialize};

/// One system prompt per agent node, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePrompts {
    pub plan: String,
    pub thought: String,
    pub action: String,
    pub observe: String,
    pub reflect: String,
}

impl Default for NodePrompts {
    fn default() -> Self {
        Self {
            plan: "Break the user's request into a short numbered list of steps. Name the tool \
                   each step needs (direct_answer, sql_trino or calculator) and the data it \
                   depends on. Do not execute anything yet."
                .into(),
            thought: "Look at the current step of the plan and the observations so far. Decide \
                      what is still unknown and which single tool call would resolve it."
                .into(),
            action: "Emit exactly one tool call that carries out the current plan step. For \
                     sql_trino write a complete SQL query; for calculator write a plain \
                     arithmetic expression; for direct_answer write the answer text."
                .into(),
            observe: "Report the raw result of the last tool call without interpretation. If \
                      the call failed, quote the error."
                .into(),
            reflect: "Compare the observation with the plan. State whether the question is now \
                      answered; if so give the final answer, otherwise say which step to retry \
                      or revise."
                .into(),
        }
    }
}

impl NodePrompts {
    /// Load prompts from a JSON file with the five node keys.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            BenchError::config(format!("invalid node prompts in {}: {e}", path.display()))
        })
    }

    /// Built-in prompts, or the file's if a path is configured.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Pretty JSON, keys in node order.
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| BenchError::parse(e.to_string()))
    }
}
