use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use taskloom_common::TenantId;
use taskloom_config::{ProviderConfig, ProviderConfigFactory, ProviderKind};
use tracing::{error, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::budget::TokenBudgetGuard;
use crate::providers::{
    ChatCompletionsProvider, ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest,
    MessagePart, ProviderError, ProviderErrorKind, ToolDefinition,
};
use crate::tenant::TenantContext;
use crate::tools::ToolRegistry;
use crate::trace::{RequestTracer, TraceReport};
use crate::watchdog::ExecutionWatchdog;

/// Maximum number of tool-use round-trips before a conversation turn is
/// forcibly stopped.
const MAX_TOOL_ITERATIONS: usize = 10;

/// The only failure text a tenant ever sees. Diagnostic detail stays in the
/// trace and logs.
const USER_FACING_FAILURE: &str = "I'm having trouble processing your request right now. \
     Please try again in a moment, or manage your tasks from the dashboard.";

const INSTRUCTIONS: &str = "You are a task-management assistant. Help the user manage \
their tasks through natural conversation.\n\
\n\
You can call these tools: add_task, list_tasks, complete_task, update_task, delete_task.\n\
\n\
Guidelines:\n\
1. Convert natural-language dates (\"tomorrow\", \"next Friday\") to YYYY-MM-DD before calling tools.\n\
2. When the user refers to tasks by position (\"the first one\"), use the most recent list_tasks result.\n\
3. Ask a clarifying question instead of guessing when a request is ambiguous.\n\
4. Confirm before deleting anything.\n\
5. After a tool call, summarize plainly what happened; if it failed, explain the error in ordinary language.\n\
6. You only manage tasks. Politely redirect anything else.";

/// Per-call knobs. The hardened and plain deployments differ only in these
/// flags, not in code paths.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub circuit_breaker_enabled: bool,
    pub tracing_enabled: bool,
    /// Hard deadline for each provider call.
    pub call_timeout: Duration,
    pub max_tool_iterations: usize,
    pub breaker: CircuitBreakerConfig,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            circuit_breaker_enabled: true,
            tracing_enabled: true,
            call_timeout: Duration::from_secs(30),
            max_tool_iterations: MAX_TOOL_ITERATIONS,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// One executed tool call and its structured result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOperation {
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
}

/// What `process_message` always resolves to; no failure mode escapes as an
/// error.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub message: String,
    pub tool_operations: Option<Vec<ToolOperation>>,
    pub success: bool,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trace: TraceReport,
}

impl ChatOutcome {
    /// Backward-compatible single-operation view: the first tool call, if any.
    pub fn primary_operation(&self) -> Option<&ToolOperation> {
        self.tool_operations.as_ref().and_then(|ops| ops.first())
    }
}

/// Fresh per-request agent definition: instructions plus tool bindings.
/// Never cached; a stale definition could leak one tenant's bindings into
/// another request.
struct AgentDefinition {
    instructions: String,
    tools: Vec<ToolDefinition>,
}

struct AttemptRun {
    message: String,
    operations: Vec<ToolOperation>,
}

enum AttemptError {
    Provider(ProviderError),
    /// The breaker rejected the call; no network attempt was made.
    CircuitOpen {
        provider: String,
    },
    Internal(taskloom_common::Error),
}

impl AttemptError {
    fn is_retriable(&self) -> bool {
        match self {
            AttemptError::Provider(err) => err.is_retriable(),
            AttemptError::CircuitOpen { .. } => true,
            AttemptError::Internal(_) => false,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Provider(err) => write!(f, "{err}"),
            AttemptError::CircuitOpen { provider } => {
                write!(f, "{provider} circuit breaker is open")
            }
            AttemptError::Internal(err) => write!(f, "{err}"),
        }
    }
}

struct RequestResult {
    message: String,
    tool_operations: Option<Vec<ToolOperation>>,
    success: bool,
    used_fallback: bool,
    error: Option<String>,
}

impl RequestResult {
    fn done(run: AttemptRun, used_fallback: bool) -> Self {
        Self {
            message: run.message,
            tool_operations: Some(run.operations),
            success: true,
            used_fallback,
            error: None,
        }
    }

    fn fatal(error: String) -> Self {
        Self {
            message: USER_FACING_FAILURE.to_string(),
            tool_operations: None,
            success: false,
            used_fallback: false,
            error: Some(error),
        }
    }
}

/// The conversation orchestrator: turns one inbound chat message into a reply
/// plus executed tool operations, surviving provider failures along the way.
///
/// Fully reentrant; the only mutable state shared between requests is the
/// circuit-breaker registry.
pub struct TaskAgent {
    config_factory: ProviderConfigFactory,
    tools: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    options: AgentOptions,
}

impl TaskAgent {
    pub fn new(config_factory: ProviderConfigFactory, tools: ToolRegistry) -> Self {
        Self::with_options(config_factory, tools, AgentOptions::default())
    }

    pub fn with_options(
        config_factory: ProviderConfigFactory,
        tools: ToolRegistry,
        options: AgentOptions,
    ) -> Self {
        Self {
            config_factory,
            tools: Arc::new(tools),
            breakers: Arc::new(CircuitBreakerRegistry::new()),
            options,
        }
    }

    /// The shared fault history, for monitoring endpoints.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Process one chat message for one tenant.
    ///
    /// The whole request runs inside a tenant scope; when this returns, the
    /// tenant id is detached no matter which path was taken.
    pub async fn process_message(
        &self,
        tenant_id: TenantId,
        message: &str,
        history: &[ChatMessage],
    ) -> ChatOutcome {
        let mut tracer = if self.options.tracing_enabled {
            RequestTracer::start(None)
        } else {
            RequestTracer::disabled()
        };
        tracer
            .stage("init")
            .input(json!({"tenant_id": tenant_id, "message_len": message.len()}))
            .ok();

        let result = TenantContext::scope(
            tenant_id,
            self.run_request(tenant_id, message, history, &mut tracer),
        )
        .await;

        ChatOutcome {
            message: result.message,
            tool_operations: result.tool_operations,
            success: result.success,
            used_fallback: result.used_fallback,
            error: result.error,
            trace: tracer.report(),
        }
    }

    async fn run_request(
        &self,
        tenant_id: TenantId,
        message: &str,
        history: &[ChatMessage],
        tracer: &mut RequestTracer,
    ) -> RequestResult {
        tracer
            .stage("auth")
            .input(json!({"tenant_id": tenant_id}))
            .ok();

        let primary = match self.config_factory.primary_config() {
            Ok(config) => config,
            Err(err) => {
                error!("no provider available: {err}");
                tracer.stage("provider_config").err(err.to_string());
                return RequestResult::fatal(err.to_string());
            }
        };

        let guard = TokenBudgetGuard::for_model(primary.model());
        let (history, was_compressed) = guard.check_and_compress(INSTRUCTIONS, history, message);
        if was_compressed {
            warn!("compressed conversation history for tenant {tenant_id}");
            tracer
                .stage("token_compression")
                .output(json!({"kept_messages": history.len()}))
                .ok();
        }

        let agent = self.build_agent();
        tracer
            .stage("agent_build")
            .output(json!({"tools": agent.tools.len()}))
            .ok();

        let primary_error = match self
            .attempt(&primary, &agent, message, &history, tracer, "llm_primary")
            .await
        {
            Ok(run) => {
                tracer.stage("response_extract").ok();
                return RequestResult::done(run, false);
            }
            Err(err) => err,
        };

        if !primary_error.is_retriable() {
            error!("fatal provider error, not retrying: {primary_error}");
            return RequestResult::fatal(format!(
                "primary provider failed: {}",
                truncate_reason(&primary_error.to_string())
            ));
        }

        let Some(fallback) = self.config_factory.fallback_config() else {
            warn!("primary provider failed and no fallback is configured");
            return RequestResult::fatal(format!(
                "primary provider failed with no fallback available: {}",
                truncate_reason(&primary_error.to_string())
            ));
        };

        warn!("primary provider failed ({primary_error}); retrying against fallback");
        match self
            .attempt(&fallback, &agent, message, &history, tracer, "llm_fallback")
            .await
        {
            Ok(run) => {
                tracer.stage("response_extract").ok();
                RequestResult::done(run, true)
            }
            Err(fallback_error) => {
                error!("both providers failed; primary: {primary_error}; fallback: {fallback_error}");
                tracer
                    .stage("all_providers_failed")
                    .err(fallback_error.to_string());
                RequestResult::fatal(format!(
                    "both providers failed; primary ({}): {}; fallback ({}): {}",
                    primary.provider(),
                    truncate_reason(&primary_error.to_string()),
                    fallback.provider(),
                    truncate_reason(&fallback_error.to_string()),
                ))
            }
        }
    }

    fn build_agent(&self) -> AgentDefinition {
        AgentDefinition {
            instructions: INSTRUCTIONS.to_string(),
            tools: self.tools.definitions(),
        }
    }

    /// Run the conversation loop against one provider: call it, execute any
    /// requested tools, feed the results back, and repeat until the model
    /// answers in plain text.
    async fn attempt(
        &self,
        config: &ProviderConfig,
        agent: &AgentDefinition,
        message: &str,
        history: &[ChatMessage],
        tracer: &mut RequestTracer,
        stage: &str,
    ) -> Result<AttemptRun, AttemptError> {
        let provider_name = config.provider().to_string();
        let breaker = self
            .breakers
            .get_or_create(&provider_name, self.options.breaker.clone());

        if self.options.circuit_breaker_enabled && !breaker.can_execute() {
            warn!("circuit breaker for '{provider_name}' is open; skipping call");
            tracer.stage(stage).err("circuit breaker open; no call attempted");
            return Err(AttemptError::CircuitOpen {
                provider: provider_name,
            });
        }

        let provider = ChatCompletionsProvider::new(config.clone());
        let watchdog = ExecutionWatchdog::new(self.options.call_timeout);

        let mut messages: Vec<ChatMessage> = history.to_vec();
        messages.push(ChatMessage::text(ChatRole::User, message));

        let mut operations: Vec<ToolOperation> = Vec::new();

        for _iteration in 0..self.options.max_tool_iterations {
            let request = LlmRequest {
                model: config.model().to_string(),
                messages: messages.clone(),
                system: Some(agent.instructions.clone()),
                max_tokens: Some(4096),
                temperature: None,
                tools: agent.tools.clone(),
            };

            let started = Instant::now();
            let result = match watchdog.guard(stage, provider.complete(&request)).await {
                Ok(inner) => inner,
                Err(deadline) => Err(ProviderError::timeout(
                    provider_name.clone(),
                    deadline.to_string(),
                )),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let response = match result {
                Ok(response) => {
                    if self.options.circuit_breaker_enabled {
                        breaker.record_success();
                    }
                    tracer
                        .stage(stage)
                        .input(json!({"message": message}))
                        .output(json!({"blocks": response.content.len()}))
                        .latency_ms(latency_ms)
                        .ok();
                    response
                }
                Err(err) => {
                    if self.options.circuit_breaker_enabled {
                        breaker.record_failure();
                    }
                    tracer
                        .stage(stage)
                        .input(json!({"message": message}))
                        .latency_ms(latency_ms)
                        .err(err.to_string());
                    return Err(AttemptError::Provider(err));
                }
            };

            let tool_uses: Vec<(String, String, Value)> = response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if tool_uses.is_empty() {
                return Ok(AttemptRun {
                    message: extract_text(&response.content),
                    operations,
                });
            }

            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: MessagePart::Parts(response.content.clone()),
            });

            let mut result_parts = Vec::new();
            for (id, name, input) in tool_uses {
                let result = self
                    .tools
                    .execute(&name, input.clone())
                    .await
                    .map_err(AttemptError::Internal)?;
                result_parts.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: result.to_string(),
                });
                operations.push(ToolOperation {
                    tool: name,
                    arguments: input,
                    result,
                });
            }

            messages.push(ChatMessage {
                role: ChatRole::Tool,
                content: MessagePart::Parts(result_parts),
            });
        }

        Err(AttemptError::Provider(ProviderError::new(
            provider_name,
            ProviderErrorKind::Unknown,
            format!(
                "tool loop exceeded maximum of {} iterations",
                self.options.max_tool_iterations
            ),
        )))
    }

    /// Probe every configured provider concurrently.
    pub async fn health_check_providers(&self) -> Vec<(String, bool)> {
        let configs: Vec<ProviderConfig> = ProviderKind::ALL
            .iter()
            .filter_map(|kind| self.config_factory.create_config(*kind))
            .collect();

        let checks = configs.into_iter().map(|config| async move {
            let name = config.provider().to_string();
            let provider = ChatCompletionsProvider::new(config);
            let ok = provider.health_check().await.unwrap_or(false);
            (name, ok)
        });

        let results = join_all(checks).await;
        for (name, ok) in &results {
            info!("provider '{name}' health: {}", if *ok { "ok" } else { "unreachable" });
        }
        results
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cap a diagnostic fragment so combined error summaries stay short.
fn truncate_reason(reason: &str) -> String {
    const MAX: usize = 100;
    if reason.len() <= MAX {
        return reason.to_string();
    }
    let mut end = MAX;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &reason[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_operation_is_the_first_entry() {
        let outcome = ChatOutcome {
            message: "done".to_string(),
            tool_operations: Some(vec![
                ToolOperation {
                    tool: "add_task".to_string(),
                    arguments: json!({"title": "a"}),
                    result: json!({"success": true}),
                },
                ToolOperation {
                    tool: "list_tasks".to_string(),
                    arguments: json!({}),
                    result: json!({"success": true}),
                },
            ]),
            success: true,
            used_fallback: false,
            error: None,
            trace: RequestTracer::disabled().report(),
        };

        assert_eq!(outcome.primary_operation().unwrap().tool, "add_task");
    }

    #[test]
    fn no_operations_means_no_primary() {
        let outcome = ChatOutcome {
            message: "hi".to_string(),
            tool_operations: Some(Vec::new()),
            success: true,
            used_fallback: false,
            error: None,
            trace: RequestTracer::disabled().report(),
        };
        assert!(outcome.primary_operation().is_none());
    }

    #[test]
    fn circuit_open_counts_as_retriable() {
        let err = AttemptError::CircuitOpen {
            provider: "gemini".to_string(),
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn auth_failures_are_not_retriable() {
        let err = AttemptError::Provider(ProviderError::new(
            "gemini",
            ProviderErrorKind::AuthFailed,
            "status 401",
        ));
        assert!(!err.is_retriable());
    }

    #[test]
    fn truncate_reason_caps_long_messages() {
        let long = "e".repeat(500);
        let truncated = truncate_reason(&long);
        assert!(truncated.len() <= 103);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn extract_text_joins_text_blocks_only() {
        let content = vec![
            ContentBlock::Text {
                text: "first".to_string(),
            },
            ContentBlock::ToolUse {
                id: "1".to_string(),
                name: "add_task".to_string(),
                input: json!({}),
            },
            ContentBlock::Text {
                text: "second".to_string(),
            },
        ];
        assert_eq!(extract_text(&content), "first\nsecond");
    }
}
