// Retrieval Agent Core
//
// This crate provides a backend-agnostic implementation of a tool-calling
// conversation loop (model call → tool execution → repeat) and a chat-agent
// facade over it.
//
// Key design decisions:
// - Uses traits (LlmDriver, ToolExecutor) for pluggable backends
// - The loop is an explicit state machine that can be driven step by step
// - Batch and streaming execution share the same step function
// - Tools are defined via a Tool trait and collected in an ordered ToolRegistry
// - Tool failures become conversation content; model failures end the turn
// - Toolkits (vector search retriever, catalog functions) populate the registry

pub mod config;
pub mod error;
pub mod message;
pub mod tool_types;
pub mod traits;

pub mod agent;
pub mod executor;
pub mod invoker;
pub mod llm_drivers;
pub mod r#loop;
pub mod step;
pub mod toolkits;
pub mod tools;

// In-memory implementations for examples and testing
pub mod memory;

// LLM Driver implementations
pub mod openai;

// Re-exports for convenience
pub use agent::{
    ChatAgent, ChatAgentChunk, ChatAgentChunkStream, ChatAgentRequest, ChatAgentResponse,
    ChatContext,
};
pub use config::{
    AgentConfig, AgentConfigBuilder, DEFAULT_SYSTEM_PROMPT, DEFAULT_TRUNCATION_NOTICE,
};
pub use error::{AgentLoopError, RegistryError, Result, ToolError, ToolkitError};
pub use executor::{ToolBatch, ToolCallExecutor};
pub use invoker::ModelInvoker;
pub use message::{Message, MessageRole};
pub use r#loop::{
    ConversationLoop, ConversationState, LoopPhase, LoopResult, MessageStream, StepOutput,
};
pub use step::{LoopStep, StepKind, StepResult};
pub use tool_types::{ToolCall, ToolDefinition};
pub use traits::ToolExecutor;

// LLM driver types re-exports
pub use llm_drivers::{
    BoxedLlmDriver, LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmResponse, LlmResponseStream, LlmStreamEvent, TokenUsage,
};
pub use openai::OpenAILlmDriver;

// Tool abstraction re-exports
pub use memory::{EchoTool, FailingTool};
pub use tools::{Tool, ToolOutcome, ToolRegistry, ToolRegistryBuilder};
pub use toolkits::Toolkit;
