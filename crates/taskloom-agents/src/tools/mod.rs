use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_common::{Error, Result, TenantId};
use tracing::{error, info, warn};

use crate::providers::ToolDefinition;
use crate::tenant::TenantContext;

pub mod tasks;
pub use tasks::register_task_tools;

/// Per-invocation context handed to every tool. The tenant id is resolved by
/// the registry from the request scope and passed explicitly; tools never
/// read shared state.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    pub tenant_id: TenantId,
}

/// A named, schema-described operation the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;

    /// Run the tool. `Err(Error::Tool(..))` marks an argument-validation
    /// failure; any other error is an unexpected execution failure. Both are
    /// wrapped by the registry; neither reaches the orchestrator raw.
    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value>;
}

/// Holds the task-operation tools and executes them by name with structured
/// error capture.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        info!("registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for a fresh agent build, in stable name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name. The returned value always carries a `success`
    /// field; lookup misses, validation failures, and tool crashes all fold
    /// into `{"success": false, "error": ..}` rather than propagating.
    ///
    /// The only `Err` this can return is an unset tenant context, which is a
    /// dispatch bug rather than a recoverable tool outcome.
    pub async fn execute(&self, name: &str, params: Value) -> Result<Value> {
        let tenant_id =
            TenantContext::current().map_err(|e| Error::Agent(e.to_string()))?;

        let Some(tool) = self.tools.get(name) else {
            warn!("tool '{name}' not registered");
            return Ok(json!({
                "success": false,
                "error": format!("tool '{name}' not registered"),
            }));
        };

        let context = ToolContext { tenant_id };
        info!("executing tool '{name}' for tenant {tenant_id}");

        match tool.execute(&context, params).await {
            Ok(output) => Ok(normalize_output(name, output)),
            Err(Error::Tool(message)) => {
                warn!("tool '{name}' rejected arguments: {message}");
                Ok(json!({
                    "success": false,
                    "error": format!("validation error: {message}"),
                }))
            }
            Err(err) => {
                // Full detail goes to the log; the model sees a short summary.
                error!("tool '{name}' execution failed: {err}");
                Ok(json!({
                    "success": false,
                    "error": format!("tool execution failed: {err}"),
                }))
            }
        }
    }
}

/// Older tools returned bare payloads without a `success` field; assume
/// success for those and log so they get fixed.
fn normalize_output(name: &str, output: Value) -> Value {
    match output {
        Value::Object(mut map) => {
            if !map.contains_key("success") {
                warn!("tool '{name}' returned no 'success' field, assuming success");
                map.insert("success".to_string(), Value::Bool(true));
            }
            Value::Object(map)
        }
        other => json!({ "success": true, "result": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantContext;

    struct EchoTenant;

    #[async_trait]
    impl Tool for EchoTenant {
        fn name(&self) -> &'static str {
            "echo_tenant"
        }
        fn description(&self) -> &'static str {
            "returns the tenant id it was called with"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, context: &ToolContext, _args: Value) -> Result<Value> {
            Ok(json!({"success": true, "tenant_id": context.tenant_id}))
        }
    }

    struct Crashing;

    #[async_trait]
    impl Tool for Crashing {
        fn name(&self) -> &'static str {
            "crashing"
        }
        fn description(&self) -> &'static str {
            "always fails"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<Value> {
            Err(Error::Database("connection lost".to_string()))
        }
    }

    struct Picky;

    #[async_trait]
    impl Tool for Picky {
        fn name(&self) -> &'static str {
            "picky"
        }
        fn description(&self) -> &'static str {
            "rejects everything"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<Value> {
            Err(Error::Tool("missing required field 'title'".to_string()))
        }
    }

    struct Legacy;

    #[async_trait]
    impl Tool for Legacy {
        fn name(&self) -> &'static str {
            "legacy"
        }
        fn description(&self) -> &'static str {
            "omits the success field"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<Value> {
            Ok(json!({"count": 3}))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTenant));
        registry.register(Box::new(Crashing));
        registry.register(Box::new(Picky));
        registry.register(Box::new(Legacy));
        registry
    }

    #[tokio::test]
    async fn injects_the_scoped_tenant() {
        let registry = registry();
        let result = TenantContext::scope(TenantId(42), async {
            registry.execute("echo_tenant", json!({})).await.unwrap()
        })
        .await;
        assert_eq!(result["tenant_id"], 42);
    }

    #[tokio::test]
    async fn unset_context_fails_fast() {
        let registry = registry();
        let result = registry.execute("echo_tenant", json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_failure() {
        let registry = registry();
        let result = TenantContext::scope(TenantId(1), async {
            registry.execute("nope", json!({})).await.unwrap()
        })
        .await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("not registered"));
    }

    #[tokio::test]
    async fn validation_errors_are_wrapped() {
        let registry = registry();
        let result = TenantContext::scope(TenantId(1), async {
            registry.execute("picky", json!({})).await.unwrap()
        })
        .await;
        assert_eq!(result["success"], false);
        assert!(
            result["error"]
                .as_str()
                .unwrap()
                .starts_with("validation error:")
        );
    }

    #[tokio::test]
    async fn execution_errors_never_propagate() {
        let registry = registry();
        let result = TenantContext::scope(TenantId(1), async {
            registry.execute("crashing", json!({})).await.unwrap()
        })
        .await;
        assert_eq!(result["success"], false);
        assert!(
            result["error"]
                .as_str()
                .unwrap()
                .starts_with("tool execution failed:")
        );
    }

    #[tokio::test]
    async fn missing_success_field_is_normalized_to_true() {
        let registry = registry();
        let result = TenantContext::scope(TenantId(1), async {
            registry.execute("legacy", json!({})).await.unwrap()
        })
        .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["count"], 3);
    }

    #[test]
    fn definitions_are_name_sorted() {
        let registry = registry();
        let defs = registry.definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["crashing", "echo_tenant", "legacy", "picky"]);
    }
}
