//! The shared agent lifecycle: every agent variant (main agent, sub-agent,
//! tournament container agent) is built from this core, which owns the
//! step/run state machine, the two lifecycle tools every agent registers
//! (`complete_task`, `manage_context`), and status/log reporting.
//!
//! One deliberate difference from a naive port of a synchronous
//! step-then-break loop: when a single model turn emits several tool calls
//! and one of them is `complete_task`, every remaining call in that same
//! turn is still executed before the agent is marked complete. A model that
//! asks for three things in one breath gets all three done.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use tourney_domain::config::AgentConfig;
use tourney_domain::config::ToolPolicy;
use tourney_domain::error::Result;
use tourney_domain::message::ToolDefinition;
use tourney_providers::{ChatRequest, LlmProvider};
use tourney_tools::ToolRegistry;

use crate::cancel::CancelToken;
use crate::context::ContextManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone)]
struct CompletionInfo {
    reason: String,
    summary: String,
    output: Option<Value>,
}

/// What happened during a single `step()` call.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The turn ran normally; the agent should keep going.
    Continued,
    /// `complete_task` was called during this turn.
    Completed { reason: String, summary: String, output: Option<Value> },
}

struct Inner {
    id: String,
    config: AgentConfig,
    provider: Arc<dyn LlmProvider>,
    context: ContextManager,
    tools: Arc<ToolRegistry>,
    tool_policy: ToolPolicy,
    cancel: CancelToken,
    status: Mutex<AgentStatus>,
    completed: AtomicBool,
    completion_info: Mutex<Option<CompletionInfo>>,
    turn_count: AtomicU64,
    logs: Mutex<Vec<Value>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
}

/// A running agent: context, tools, and the step/run state machine bound
/// together. Cheap to clone — every clone shares the same underlying state.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub async fn new(id: impl Into<String>, config: AgentConfig, provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, tool_policy: ToolPolicy) -> Self {
        let context = ContextManager::new(config.max_tokens, config.compaction_threshold, config.preserve_recent_messages);

        let inner = Arc::new(Inner {
            id: id.into(),
            config,
            provider,
            context,
            tools,
            tool_policy,
            cancel: CancelToken::new(),
            status: Mutex::new(AgentStatus::Idle),
            completed: AtomicBool::new(false),
            completion_info: Mutex::new(None),
            turn_count: AtomicU64::new(0),
            logs: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
        });

        let agent = Self { inner };
        agent.register_lifecycle_tools().await;
        agent
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn context(&self) -> &ContextManager {
        &self.inner.context
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.inner.context.set_system_prompt(prompt);
    }

    // ── Lifecycle tools every agent registers ───────────────────────

    async fn register_lifecycle_tools(&self) {
        {
            let inner = self.inner.clone();
            self.inner
                .tools
                .register(tourney_tools::Tool {
                    name: "complete_task".into(),
                    description: "Signal that the current task is finished.".into(),
                    parameter_schema: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "reason": {"type": "string"},
                            "summary": {"type": "string"},
                            "output": {}
                        },
                        "required": ["reason", "summary"]
                    }),
                    handler: Arc::new(move |args: Value| {
                        let inner = inner.clone();
                        async move {
                            let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
                            let summary = args.get("summary").and_then(|v| v.as_str()).unwrap_or("").to_string();
                            let output = args.get("output").cloned();
                            *inner.completion_info.lock() = Some(CompletionInfo { reason: reason.clone(), summary: summary.clone(), output: output.clone() });
                            inner.completed.store(true, Ordering::SeqCst);
                            Ok(serde_json::json!({"acknowledged": true, "reason": reason, "summary": summary}))
                        }
                    }),
                    category: "lifecycle".into(),
                    protected: true,
                })
                .await;
        }

        {
            let inner = self.inner.clone();
            self.inner
                .tools
                .register(tourney_tools::Tool {
                    name: "manage_context".into(),
                    description: "Inspect or adjust this agent's context-window compaction policy.".into(),
                    parameter_schema: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "action": {"type": "string", "enum": ["compact_now", "set_threshold", "get_status"]},
                            "threshold": {"type": "number"}
                        },
                        "required": ["action"]
                    }),
                    handler: Arc::new(move |args: Value| {
                        let inner = inner.clone();
                        async move {
                            let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("get_status");
                            match action {
                                "get_status" => Ok(inner.context.get_status()),
                                "set_threshold" => {
                                    let threshold = args.get("threshold").and_then(|v| v.as_f64()).ok_or("threshold is required for set_threshold")? as f32;
                                    let applied = inner.context.set_threshold(threshold);
                                    Ok(serde_json::json!({"applied": applied, "threshold": inner.context.threshold()}))
                                }
                                "compact_now" => {
                                    inner.context.compact(inner.provider.as_ref(), inner.config.summarizer_model.clone()).await.map_err(|e| e.to_string())?;
                                    Ok(serde_json::json!({"compacted": true, "compaction_count": inner.context.compaction_count()}))
                                }
                                other => Err(format!("unknown manage_context action '{other}'")),
                            }
                        }
                    }),
                    category: "meta".into(),
                    protected: true,
                })
                .await;
        }
    }

    fn log(&self, kind: &str, detail: Value) {
        let entry = serde_json::json!({
            "step": self.inner.turn_count.load(Ordering::SeqCst),
            "timestamp": Utc::now().to_rfc3339(),
            "type": kind,
            "detail": detail,
        });
        self.inner.logs.lock().push(entry);
    }

    pub fn get_logs(&self) -> Vec<Value> {
        self.inner.logs.lock().clone()
    }

    pub fn get_status(&self) -> AgentStatus {
        *self.inner.status.lock()
    }

    pub fn turn_count(&self) -> u64 {
        self.inner.turn_count.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.inner.cancel.cancel();
        *self.inner.status.lock() = AgentStatus::Stopped;
    }

    pub fn pause(&self) {
        *self.inner.status.lock() = AgentStatus::Paused;
    }

    pub fn resume(&self) {
        *self.inner.status.lock() = AgentStatus::Running;
    }

    /// Whether `complete_task` has fired and not yet been acknowledged.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Clear the completion flag so the agent can keep looping past a
    /// `complete_task` call instead of that call being terminal — the main
    /// agent uses this to treat completion as a pause, not a stop.
    pub fn acknowledge_completion(&self) -> Option<(String, String, Option<Value>)> {
        let info = self.inner.completion_info.lock().take();
        self.inner.completed.store(false, Ordering::SeqCst);
        info.map(|i| (i.reason, i.summary, i.output))
    }

    // ── Step ─────────────────────────────────────────────────────────

    /// Run one model turn: optionally compact the context, call the
    /// provider, and execute every tool call the response contains in
    /// order — all of them, even if one is `complete_task`.
    pub async fn step(&self) -> Result<StepOutcome> {
        self.inner.turn_count.fetch_add(1, Ordering::SeqCst);

        if self.inner.context.needs_compaction() {
            self.inner.context.compact(self.inner.provider.as_ref(), self.inner.config.summarizer_model.clone()).await?;
            self.log("context_compacted", serde_json::json!({"compaction_count": self.inner.context.compaction_count()}));
        }

        let tool_defs = self.allowed_tool_definitions().await;
        let req = ChatRequest {
            messages: self.inner.context.get_messages_for_api(),
            tools: tool_defs,
            temperature: Some(self.inner.config.temperature),
            max_tokens: Some(self.inner.config.max_response_tokens),
            model: Some(self.inner.config.model.clone()),
            json_mode: false,
        };

        let response = self.inner.provider.chat(req).await?;

        if !response.content.is_empty() {
            self.inner.context.append_assistant(response.content.clone());
        }

        if !response.tool_calls.is_empty() {
            self.inner.context.append_tool_call(&response.tool_calls);

            for call in &response.tool_calls {
                let result = if self.inner.tool_policy.allows(&call.tool_name) {
                    self.inner.tools.dispatch(&call.tool_name, call.arguments.clone()).await
                } else {
                    serde_json::json!({"success": false, "error": format!("tool '{}' is not permitted for this agent", call.tool_name)})
                };

                self.log(
                    "tool_call",
                    serde_json::json!({"tool_name": call.tool_name, "arguments": call.arguments, "result": result}),
                );

                let mut content_for_context = result.clone();
                if let Some(obj) = content_for_context.as_object_mut() {
                    obj.remove("description");
                }
                self.inner
                    .context
                    .append_tool_result(call.call_id.clone(), content_for_context.to_string());
            }
        }

        if self.inner.completed.load(Ordering::SeqCst) {
            let info = self.inner.completion_info.lock().clone().unwrap_or(CompletionInfo {
                reason: "completed".into(),
                summary: String::new(),
                output: None,
            });
            return Ok(StepOutcome::Completed { reason: info.reason, summary: info.summary, output: info.output });
        }

        Ok(StepOutcome::Continued)
    }

    async fn allowed_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.inner
            .tools
            .schemas()
            .await
            .into_iter()
            .filter_map(|schema| {
                let name = schema.get("name")?.as_str()?.to_string();
                if !self.inner.tool_policy.allows(&name) {
                    return None;
                }
                Some(ToolDefinition {
                    name,
                    description: schema.get("description")?.as_str().unwrap_or("").to_string(),
                    parameters: schema.get("parameters").cloned().unwrap_or(serde_json::json!({})),
                })
            })
            .collect()
    }

    // ── Run ──────────────────────────────────────────────────────────

    /// Drive `step()` to completion: until `complete_task` fires, a
    /// configured `max_turns` is reached, the caller cancels, or an error
    /// occurs. A configured `timeout_secs` bounds the whole run.
    pub async fn run(&self, initial_prompt: Option<String>) -> AgentStatus {
        *self.inner.status.lock() = AgentStatus::Running;
        *self.inner.started_at.lock() = Some(Utc::now());

        if let Some(prompt) = initial_prompt {
            self.inner.context.append_user(prompt);
        }

        let run_fut = self.run_loop();
        let outcome = match self.inner.config.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run_fut).await {
                Ok(status) => status,
                Err(_) => {
                    self.log("timeout", serde_json::json!({"timeout_secs": secs}));
                    AgentStatus::Completed
                }
            },
            None => run_fut.await,
        };

        *self.inner.status.lock() = outcome;
        *self.inner.completed_at.lock() = Some(Utc::now());
        outcome
    }

    async fn run_loop(&self) -> AgentStatus {
        loop {
            if self.inner.cancel.is_cancelled() {
                return AgentStatus::Stopped;
            }
            if matches!(*self.inner.status.lock(), AgentStatus::Paused) {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            if let Some(max_turns) = self.inner.config.max_turns {
                if self.turn_count() >= max_turns as u64 {
                    self.log("max_turns_reached", serde_json::json!({"max_turns": max_turns}));
                    return AgentStatus::Completed;
                }
            }

            match self.step().await {
                Ok(StepOutcome::Completed { reason, summary, .. }) => {
                    self.log("completed", serde_json::json!({"reason": reason, "summary": summary}));
                    return AgentStatus::Completed;
                }
                Ok(StepOutcome::Continued) => continue,
                Err(e) => {
                    self.log("error", serde_json::json!({"error": e.to_string()}));
                    return AgentStatus::Failed;
                }
            }
        }
    }
}
