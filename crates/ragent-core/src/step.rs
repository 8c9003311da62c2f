// Loop step representation
//
// LoopStep records a single transition of the conversation loop.
// This abstraction allows the loop to be driven one step at a time
// (ConversationLoop::step) while keeping a timed trace of what happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool_types::ToolCall;

/// What a step did
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Assistant turn from the model
    ModelCall,
    /// One batch of tool calls
    ToolExecution,
    /// Forced termination after the iteration bound
    Truncation,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::ModelCall => write!(f, "model_call"),
            StepKind::ToolExecution => write!(f, "tool_execution"),
            StepKind::Truncation => write!(f, "truncation"),
        }
    }
}

/// Timed record of one loop transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStep {
    pub id: Uuid,
    /// 1-based model iteration
    pub iteration: usize,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once the step finishes
    pub result: Option<StepResult>,
}

/// Outcome attached to a finished step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    /// The model answered
    ModelCallComplete {
        /// ID of the appended assistant message
        message_id: String,
        /// Tool calls requested (empty if none)
        tool_calls: Vec<ToolCall>,
    },

    /// Every call in the batch has a result
    ToolExecutionComplete {
        /// IDs of the tool calls answered, in call order
        tool_call_ids: Vec<String>,
        /// Number of results carrying an error
        error_count: usize,
    },

    /// Loop was cut short
    Truncated {
        /// The bound that was reached
        max_iterations: usize,
    },
}

impl LoopStep {
    fn start(kind: StepKind, iteration: usize) -> Self {
        Self {
            id: Uuid::now_v7(),
            iteration,
            kind,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }

    pub fn model_call(iteration: usize) -> Self {
        Self::start(StepKind::ModelCall, iteration)
    }

    pub fn tool_execution(iteration: usize) -> Self {
        Self::start(StepKind::ToolExecution, iteration)
    }

    pub fn truncation(iteration: usize) -> Self {
        Self::start(StepKind::Truncation, iteration)
    }

    /// Stamp the end time and attach the outcome
    pub fn complete(mut self, result: StepResult) -> Self {
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        self
    }

    /// True once `complete` has been called
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Wall time in milliseconds, if finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
