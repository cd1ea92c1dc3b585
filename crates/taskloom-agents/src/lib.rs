pub mod agent;
pub mod breaker;
pub mod budget;
pub mod providers;
pub mod tenant;
pub mod tools;
pub mod trace;
pub mod watchdog;

pub use agent::{AgentOptions, ChatOutcome, TaskAgent, ToolOperation};
pub use breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use budget::TokenBudgetGuard;
pub use providers::{
    ChatCompletionsProvider, ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest,
    LlmResponse, MessagePart, ProviderError, ProviderErrorKind, ToolDefinition, Usage,
};
pub use tenant::{TenantContext, TenantContextUnset};
pub use tools::{Tool, ToolContext, ToolRegistry, register_task_tools};
pub use trace::{RequestTracer, TraceReport, TraceStage};
pub use watchdog::{DeadlineExceeded, ExecutionWatchdog};
