//! Tool registration and dispatch.
//!
//! Every tool the agent runtime exposes to a model goes through this
//! registry: it owns the JSON Schema advertised to the model, auto-injects
//! a `tool_description` field the model must echo back (used for audit
//! logging, stripped before the handler runs), and wraps handler results in
//! a uniform `{"success": ..., ...}` envelope.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;

/// A tool's executable behavior. Implementors receive the call arguments
/// with `tool_description` already stripped.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, String>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, String> {
        (self)(arguments).await
    }
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
    pub category: String,
    /// Protected tools cannot be deleted via `delete_tool`.
    pub protected: bool,
}

/// Holds every tool available to an agent and dispatches calls to them.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, tool: Tool) {
        self.tools.write().await.insert(tool.name.clone(), tool);
    }

    /// Remove a tool. Protected tools refuse to be removed.
    pub async fn unregister(&self, name: &str) -> Result<(), String> {
        let mut tools = self.tools.write().await;
        match tools.get(name) {
            Some(t) if t.protected => Err(format!("tool '{name}' is protected and cannot be deleted")),
            Some(_) => {
                tools.remove(name);
                Ok(())
            }
            None => Err(format!("tool '{name}' does not exist")),
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// JSON Schema definitions for every registered tool, with a required
    /// `tool_description` string property injected into each one's
    /// parameters — the model must restate, in its own words, why it is
    /// calling the tool with these arguments.
    pub async fn schemas(&self) -> Vec<Value> {
        let tools = self.tools.read().await;
        let mut entries: Vec<(&String, &Tool)> = tools.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());

        entries
            .into_iter()
            .map(|(_, tool)| {
                let mut params = tool.parameter_schema.clone();
                if let Some(obj) = params.as_object_mut() {
                    let properties = obj.entry("properties").or_insert_with(|| Value::Object(Default::default()));
                    if let Some(props) = properties.as_object_mut() {
                        props.insert(
                            "tool_description".into(),
                            serde_json::json!({
                                "type": "string",
                                "description": "Briefly explain, in your own words, why you are calling this tool now."
                            }),
                        );
                    }
                    let required = obj.entry("required").or_insert_with(|| Value::Array(Vec::new()));
                    if let Some(req) = required.as_array_mut() {
                        if !req.iter().any(|v| v == "tool_description") {
                            req.push(Value::String("tool_description".into()));
                        }
                    }
                }
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": params,
                })
            })
            .collect()
    }

    /// Invoke a tool by name. `tool_description` is stripped from the
    /// arguments before the handler runs and re-attached to the result
    /// afterward. Non-object handler results are coerced into
    /// `{"result": ...}` so every dispatch returns a JSON object.
    pub async fn dispatch(&self, name: &str, mut arguments: Value) -> Value {
        let description = arguments
            .as_object_mut()
            .and_then(|obj| obj.remove("tool_description"))
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();

        let tool = {
            let tools = self.tools.read().await;
            tools.get(name).cloned()
        };

        let Some(tool) = tool else {
            return serde_json::json!({
                "success": false,
                "error": format!("unknown tool '{name}'"),
                "description": description,
            });
        };

        // catch_unwind: a panicking handler must still produce a tool result
        // so the context never ends up with a dangling tool_call.
        let call_result = AssertUnwindSafe(tool.handler.call(arguments)).catch_unwind().await;

        match call_result {
            Ok(Ok(result)) => {
                let mut result = if result.is_object() { result } else { serde_json::json!({"result": result}) };
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("success".into(), Value::Bool(true));
                    obj.insert("description".into(), Value::String(description));
                }
                result
            }
            Ok(Err(error)) => serde_json::json!({
                "success": false,
                "error": error,
                "description": description,
            }),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool handler panicked".into());
                serde_json::json!({
                    "success": false,
                    "error": format!("tool '{name}' panicked: {message}"),
                    "description": description,
                })
            }
        }
    }

    /// Register a brand-new tool at runtime, rejecting an attempt to shadow
    /// a protected built-in.
    pub async fn create_tool(&self, tool: Tool) -> Result<(), String> {
        let tools = self.tools.read().await;
        if let Some(existing) = tools.get(&tool.name) {
            if existing.protected {
                return Err(format!("tool '{}' is protected and cannot be overwritten", tool.name));
            }
        }
        drop(tools);
        self.register(tool).await;
        Ok(())
    }

    pub async fn delete_tool(&self, name: &str) -> Result<(), String> {
        self.unregister(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool(name: &str, protected: bool) -> Tool {
        Tool {
            name: name.into(),
            description: "echoes its arguments".into(),
            parameter_schema: serde_json::json!({"type": "object", "properties": {}}),
            handler: Arc::new(|args: Value| async move { Ok(args) }),
            category: "test".into(),
            protected,
        }
    }

    #[tokio::test]
    async fn dispatch_strips_and_reattaches_description() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo", false)).await;

        let result = registry
            .dispatch("echo", serde_json::json!({"tool_description": "testing", "x": 1}))
            .await;

        assert_eq!(result["description"], "testing");
        assert_eq!(result["success"], true);
        assert_eq!(result["x"], 1);
        assert!(result.get("tool_description").is_none());
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_reports_failure() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch("missing", serde_json::json!({})).await;
        assert_eq!(result["success"], false);
    }

    #[tokio::test]
    async fn dispatch_coerces_non_object_result() {
        let registry = ToolRegistry::new();
        registry.register(Tool {
            name: "raw".into(),
            description: "returns a bare string".into(),
            parameter_schema: serde_json::json!({"type": "object"}),
            handler: Arc::new(|_: Value| async move { Ok(Value::String("hi".into())) }),
            category: "test".into(),
            protected: false,
        }).await;

        let result = registry.dispatch("raw", serde_json::json!({})).await;
        assert_eq!(result["result"], "hi");
    }

    #[tokio::test]
    async fn protected_tool_cannot_be_deleted() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("read_file", true)).await;
        let err = registry.delete_tool("read_file").await.unwrap_err();
        assert!(err.contains("protected"));
    }

    #[tokio::test]
    async fn dispatch_catches_panicking_handler() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool {
                name: "boom".into(),
                description: "always panics".into(),
                parameter_schema: serde_json::json!({"type": "object", "properties": {}}),
                handler: Arc::new(|_: Value| async move {
                    panic!("intentional panic for testing catch_unwind");
                    #[allow(unreachable_code)]
                    Ok::<Value, String>(Value::Null)
                }),
                category: "test".into(),
                protected: false,
            })
            .await;

        let result = registry.dispatch("boom", serde_json::json!({"tool_description": "trigger it"})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("panicked"));
        assert_eq!(result["description"], "trigger it");
    }

    #[tokio::test]
    async fn schemas_inject_required_tool_description() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo", false)).await;
        let schemas = registry.schemas().await;
        assert_eq!(schemas.len(), 1);
        let params = &schemas[0]["parameters"];
        assert!(params["properties"]["tool_description"].is_object());
        assert!(params["required"].as_array().unwrap().iter().any(|v| v == "tool_description"));
    }
}
