// Conversation Loop
//
// The tool-calling state machine:
//
//   AwaitModel --(assistant requested tools)--> AwaitTools
//   AwaitModel --(plain assistant reply)------> Done
//   AwaitTools --(all tool results appended)--> AwaitModel
//
// The state is an explicit, append-only ConversationState that each step
// takes by value and hands back, so one request never shares it with another.
// Batch (`run`) and streaming (`run_stream`) execution are both built on
// `step`, which keeps their outputs identical.

use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentLoopError, Result};
use crate::executor::ToolCallExecutor;
use crate::invoker::ModelInvoker;
use crate::llm_drivers::LlmDriver;
use crate::message::{Message, MessageRole};
use crate::step::{LoopStep, StepResult};
use crate::tool_types::ToolCall;
use crate::traits::ToolExecutor;

/// Stream of produced messages, in production order
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

// ============================================================================
// Loop state
// ============================================================================

/// Phase of the conversation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Waiting for the model's next assistant message
    AwaitModel,
    /// Waiting for the results of the latest tool calls
    AwaitTools,
    /// Terminal
    Done,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::AwaitModel => write!(f, "await_model"),
            LoopPhase::AwaitTools => write!(f, "await_tools"),
            LoopPhase::Done => write!(f, "done"),
        }
    }
}

/// Conversation state for one request.
///
/// Holds the inbound history followed by every message produced so far.
/// Messages are only ever appended.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    history_len: usize,
    phase: LoopPhase,
    iterations: usize,
    truncated: bool,
    trace: Vec<LoopPhase>,
}

impl ConversationState {
    /// Start a new conversation from the inbound history
    pub fn new(history: Vec<Message>) -> Result<Self> {
        if history.is_empty() {
            return Err(AgentLoopError::NoMessages);
        }
        Ok(Self {
            history_len: history.len(),
            messages: history,
            phase: LoopPhase::AwaitModel,
            iterations: 0,
            truncated: false,
            trace: vec![LoopPhase::AwaitModel],
        })
    }

    /// Current phase
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == LoopPhase::Done
    }

    /// Number of model invocations so far
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Whether the iteration bound cut the loop short
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Inbound history plus produced messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages produced by the loop (excludes the inbound history)
    pub fn produced(&self) -> &[Message] {
        &self.messages[self.history_len..]
    }

    /// Phases visited so far, starting with AwaitModel
    pub fn trace(&self) -> &[LoopPhase] {
        &self.trace
    }

    /// Tool calls of the most recent assistant message
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.messages.last() {
            Some(msg) if msg.role == MessageRole::Assistant => msg.tool_calls(),
            _ => &[],
        }
    }

    fn transition(&mut self, phase: LoopPhase) {
        self.phase = phase;
        self.trace.push(phase);
    }

    fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    fn into_result(self, steps: Vec<LoopStep>) -> LoopResult {
        let final_response = self
            .produced()
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && !m.has_tool_calls())
            .map(|m| m.content.clone())
            .filter(|c| !c.is_empty());
        let iterations = self.iterations;
        let truncated = self.truncated;
        let history_len = self.history_len;
        let mut messages = self.messages;

        LoopResult {
            messages: messages.split_off(history_len),
            iterations,
            phases: self.trace,
            truncated,
            final_response,
            steps,
        }
    }
}

/// Output of a single loop step
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// State after the step
    pub state: ConversationState,
    /// Messages appended by this step, in order
    pub produced: Vec<Message>,
    /// Record of the step (None when the state was already done)
    pub step: Option<LoopStep>,
}

/// Result of a complete loop execution
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// Every message produced during the turn, in production order
    pub messages: Vec<Message>,
    /// Number of model invocations
    pub iterations: usize,
    /// Visited phases, from the initial AwaitModel to Done
    pub phases: Vec<LoopPhase>,
    /// Whether the iteration bound cut the loop short
    pub truncated: bool,
    /// Final assistant response text (if any)
    pub final_response: Option<String>,
    /// Step records, in execution order
    pub steps: Vec<LoopStep>,
}

// ============================================================================
// ConversationLoop
// ============================================================================

/// The conversation loop
///
/// Orchestrates model inference and tool execution with pluggable backends:
/// - LLM calls (LlmDriver)
/// - Tool execution (ToolExecutor)
pub struct ConversationLoop<L, T>
where
    L: LlmDriver,
    T: ToolExecutor,
{
    config: AgentConfig,
    invoker: ModelInvoker<L>,
    executor: ToolCallExecutor<T>,
}

impl<L, T> ConversationLoop<L, T>
where
    L: LlmDriver,
    T: ToolExecutor,
{
    /// Create a new conversation loop
    pub fn new(config: AgentConfig, llm_driver: L, tool_executor: T) -> Self {
        Self::with_tool_arc(config, llm_driver, Arc::new(tool_executor))
    }

    /// Create a new conversation loop over a shared tool executor
    pub fn with_tool_arc(config: AgentConfig, llm_driver: L, tool_executor: Arc<T>) -> Self {
        let executor = ToolCallExecutor::with_arc(tool_executor)
            .parallel(config.parallel_tool_calls)
            .with_timeout(config.tool_timeout);
        Self {
            invoker: ModelInvoker::new(llm_driver, config.clone()),
            executor,
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get reference to the LLM driver
    pub fn llm_driver(&self) -> &L {
        self.invoker.driver()
    }

    /// Get reference to the tool executor
    pub fn tool_executor(&self) -> &T {
        self.executor.tools()
    }

    /// Create the initial state for `history`
    pub fn start(&self, history: Vec<Message>) -> Result<ConversationState> {
        if self.config.max_iterations == 0 {
            return Err(AgentLoopError::config("max_iterations must be at least 1"));
        }
        ConversationState::new(history)
    }

    /// Execute a single state-machine transition
    ///
    /// A model failure is returned as an error and the state is dropped;
    /// tool failures are part of the produced messages.
    pub async fn step(&self, mut state: ConversationState) -> Result<StepOutput> {
        let before = state.messages.len();
        let phase = state.phase;

        let step = match phase {
            LoopPhase::Done => {
                return Ok(StepOutput {
                    state,
                    produced: Vec::new(),
                    step: None,
                })
            }
            LoopPhase::AwaitModel if state.iterations >= self.config.max_iterations => {
                self.truncate(&mut state)
            }
            LoopPhase::AwaitModel => self.call_model(&mut state).await?,
            LoopPhase::AwaitTools => self.execute_tools(&mut state).await,
        };

        let produced = state.messages[before..].to_vec();
        Ok(StepOutput {
            state,
            produced,
            step: Some(step),
        })
    }

    /// Run the loop to completion
    pub async fn run(&self, history: Vec<Message>) -> Result<LoopResult> {
        let mut state = self.start(history)?;
        let mut steps = Vec::new();

        info!(history_len = state.history_len, "Starting conversation loop");

        while !state.is_done() {
            let output = self.step(state).await.inspect_err(|e| {
                error!(error = %e, "Conversation loop failed");
            })?;
            steps.extend(output.step);
            state = output.state;
        }

        info!(
            iterations = state.iterations,
            produced = state.produced().len(),
            truncated = state.truncated,
            "Conversation loop completed"
        );

        Ok(state.into_result(steps))
    }

    /// Run the loop, yielding every produced message as soon as its step
    /// completes. After an error the stream ends.
    ///
    /// Dropping the stream cancels the in-flight model or tool call.
    pub fn run_stream(self: Arc<Self>, history: Vec<Message>) -> MessageStream
    where
        L: 'static,
        T: 'static,
    {
        let initial = self.start(history);

        let messages = stream::unfold(Some((self, initial)), |state| async move {
            let (this, current) = state?;
            let current = match current {
                Ok(current) => current,
                Err(e) => return Some((vec![Err(e)], None)),
            };
            if current.is_done() {
                debug!(iterations = current.iterations, "Conversation stream completed");
                return None;
            }

            match this.step(current).await {
                Ok(output) => {
                    let produced = output.produced.into_iter().map(Ok).collect();
                    Some((produced, Some((this, Ok(output.state)))))
                }
                Err(e) => {
                    error!(error = %e, "Conversation stream failed");
                    Some((vec![Err(e)], None))
                }
            }
        })
        .flat_map(stream::iter);

        Box::pin(messages)
    }

    // =========================================================================
    // Private methods
    // =========================================================================

    async fn call_model(&self, state: &mut ConversationState) -> Result<LoopStep> {
        state.iterations += 1;
        let step = LoopStep::model_call(state.iterations);

        let tools = self.executor.tool_definitions();
        let reply = self
            .invoker
            .infer(&state.messages, &tools, &self.config.system_prompt)
            .await?;

        let tool_calls = reply.tool_calls().to_vec();
        info!(
            iteration = state.iterations,
            message_id = %reply.id,
            tool_calls = tool_calls.len(),
            "Model responded"
        );

        let step = step.complete(StepResult::ModelCallComplete {
            message_id: reply.id.clone(),
            tool_calls: tool_calls.clone(),
        });

        state.append([reply]);
        state.transition(if tool_calls.is_empty() {
            LoopPhase::Done
        } else {
            LoopPhase::AwaitTools
        });

        Ok(step)
    }

    async fn execute_tools(&self, state: &mut ConversationState) -> LoopStep {
        let step = LoopStep::tool_execution(state.iterations);
        let tool_calls = state.pending_tool_calls().to_vec();

        let batch = self.executor.execute(&tool_calls).await;
        let error_count = batch.error_count;

        state.append(batch.messages);
        state.transition(LoopPhase::AwaitModel);

        step.complete(StepResult::ToolExecutionComplete {
            tool_call_ids: tool_calls.into_iter().map(|c| c.id).collect(),
            error_count,
        })
    }

    fn truncate(&self, state: &mut ConversationState) -> LoopStep {
        let max_iterations = self.config.max_iterations;
        warn!(max = max_iterations, "Max iterations reached, truncating turn");

        let step = LoopStep::truncation(state.iterations);
        let notice_id = state
            .messages
            .last()
            .map(|m| format!("{}-truncated", m.id))
            .unwrap_or_else(|| "truncated".to_string());

        state.append([Message::assistant(&self.config.truncation_notice).with_id(notice_id)]);
        state.truncated = true;
        state.transition(LoopPhase::Done);

        step.complete(StepResult::Truncated { max_iterations })
    }
}
