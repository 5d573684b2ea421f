//! The main agent: the single long-lived, continuously looping agent that
//! drives a user's goals forward. Unlike a sub-agent, `complete_task` here
//! does not end the run — it pauses the loop so a caller can inspect state,
//! then the loop resumes on the next tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

use tourney_domain::config::{AgentConfig, ToolPolicy};
use tourney_providers::LlmProvider;
use tourney_tools::ToolRegistry;

use crate::agent_core::{Agent, AgentStatus, StepOutcome};
use crate::prompt_queue::{Priority, PromptQueue, QueuedPrompt};

const NUDGE_EVERY_N_LOOPS: u32 = 10;
const LOOP_TICK: Duration = Duration::from_millis(500);

/// Counters and timestamps that outlive a single process: written to disk
/// after every iteration so a restart picks the loop count back up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub loop_count: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_action: String,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self { loop_count: 0, status: "stopped".into(), started_at: None, last_action: String::new() }
    }
}

impl PersistentState {
    fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }
}

/// A user-supplied function that builds the system prompt for each
/// iteration, typically folding in current todos/journal/goal state. Kept
/// generic so the runtime doesn't need to know about those subsystems.
pub type SystemPromptBuilder = Box<dyn Fn() -> String + Send + Sync>;

/// A user-supplied function returning an improvement nudge (or empty string
/// for "nothing to nudge about"), consulted every `NUDGE_EVERY_N_LOOPS` loops.
pub type NudgeBuilder = Box<dyn Fn() -> String + Send + Sync>;

pub struct MainAgent {
    agent: Agent,
    queue: PromptQueue,
    state_path: PathBuf,
    state: Mutex<PersistentState>,
    system_prompt_builder: Mutex<Option<SystemPromptBuilder>>,
    nudge_builder: Mutex<Option<NudgeBuilder>>,
}

impl MainAgent {
    pub async fn new(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        tool_policy: ToolPolicy,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        let agent = Agent::new("main", config, provider, tools, tool_policy).await;
        let state_path = state_path.into();
        let state = PersistentState::load(&state_path);
        Self {
            agent,
            queue: PromptQueue::new(),
            state_path,
            state: Mutex::new(state),
            system_prompt_builder: Mutex::new(None),
            nudge_builder: Mutex::new(None),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn set_system_prompt_builder(&self, f: impl Fn() -> String + Send + Sync + 'static) {
        *self.system_prompt_builder.lock() = Some(Box::new(f));
    }

    pub fn set_nudge_builder(&self, f: impl Fn() -> String + Send + Sync + 'static) {
        *self.nudge_builder.lock() = Some(Box::new(f));
    }

    pub fn loop_count(&self) -> u64 {
        self.state.lock().loop_count
    }

    pub fn queue_prompt(&self, prompt: impl Into<String>, priority: Priority) -> String {
        self.queue.enqueue(prompt, priority)
    }

    pub fn queued_prompts(&self) -> Vec<QueuedPrompt> {
        self.queue.list()
    }

    pub fn remove_queued_prompt(&self, id: &str) -> bool {
        self.queue.remove(id)
    }

    pub fn clear_prompt_queue(&self) {
        self.queue.clear()
    }

    /// Rebuild the system prompt, inject any queued prompts as
    /// `[USER PROMPT]` system notifications, and append a periodic
    /// improvement nudge every `NUDGE_EVERY_N_LOOPS` loops.
    fn pre_step(&self) {
        if let Some(builder) = self.system_prompt_builder.lock().as_ref() {
            self.agent.set_system_prompt(builder());
        }

        let loop_count = self.state.lock().loop_count;
        if loop_count > 0 && loop_count % NUDGE_EVERY_N_LOOPS as u64 == 0 {
            if let Some(nudge_fn) = self.nudge_builder.lock().as_ref() {
                let nudge = nudge_fn();
                if !nudge.is_empty() {
                    self.agent.context().append_system_notification(format!("[IMPROVEMENT REMINDER]\n{nudge}"));
                }
            }
        }

        while let Some(queued) = self.queue.pop() {
            self.agent
                .context()
                .append_system_notification(format!("[USER PROMPT]\nThe user has sent you the following message:\n\n{}", queued.prompt));
        }
    }

    fn post_step(&self, outcome: &StepOutcome) {
        let mut state = self.state.lock();
        state.loop_count += 1;
        state.last_action = match outcome {
            StepOutcome::Completed { reason, .. } => reason.clone(),
            StepOutcome::Continued => "continued".into(),
        };
        state.save(&self.state_path);
    }

    /// Run the agent loop continuously. `complete_task` pauses the loop
    /// (the completion flag is acknowledged and cleared) rather than
    /// ending it; the caller's `max_iterations`, if set, bounds how many
    /// turns this call takes before returning.
    pub async fn run_continuous(&self, initial_prompt: Option<String>, max_iterations: Option<u64>) -> AgentStatus {
        {
            let mut state = self.state.lock();
            state.status = "running".into();
            state.started_at = Some(Utc::now());
            state.save(&self.state_path);
        }

        if let Some(builder) = self.system_prompt_builder.lock().as_ref() {
            self.agent.set_system_prompt(builder());
        }
        if let Some(prompt) = initial_prompt {
            self.agent.context().append_user(prompt);
        }

        let mut iteration: u64 = 0;
        loop {
            if self.agent.cancel_token().is_cancelled() {
                break;
            }
            if matches!(self.agent.get_status(), AgentStatus::Paused) {
                tokio::time::sleep(LOOP_TICK).await;
                continue;
            }

            self.pre_step();

            let outcome = match self.agent.step().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "main agent step failed, pausing the loop");
                    break;
                }
            };

            if let StepOutcome::Completed { reason, .. } = &outcome {
                tracing::info!(reason = %reason, "main agent signaled completion, pausing rather than stopping");
                self.agent.acknowledge_completion();
            }

            self.post_step(&outcome);

            iteration += 1;
            if let Some(max) = max_iterations {
                if iteration >= max {
                    break;
                }
            }

            tokio::time::sleep(LOOP_TICK).await;
        }

        let mut state = self.state.lock();
        state.status = "stopped".into();
        state.save(&self.state_path);
        AgentStatus::Stopped
    }

    /// Reset the loop counter and, unless `keep_context`, the running
    /// context log. Used to restart a stuck or misdirected main agent
    /// without losing its on-disk history entirely.
    pub fn restart(&self, prompt: Option<String>, keep_context: bool) {
        self.agent.cancel_token().cancel();

        if !keep_context {
            self.agent.context().reset();
        }

        if let Some(prompt) = prompt {
            self.agent
                .context()
                .append_system_notification(format!("[USER RESTART MESSAGE]\nThe user has restarted the agent with the following message:\n\n{prompt}"));
        }

        let mut state = self.state.lock();
        state.loop_count = 0;
        state.status = "stopped".into();
        state.save(&self.state_path);
    }

    pub fn get_status(&self) -> Value {
        let state = self.state.lock();
        let mut status = self.agent.context().get_status();
        if let Some(obj) = status.as_object_mut() {
            obj.insert("loop_count".into(), serde_json::json!(state.loop_count));
            obj.insert("agent_status".into(), serde_json::json!(self.agent.get_status()));
            obj.insert("last_action".into(), serde_json::json!(state.last_action));
            obj.insert("queued_prompts".into(), serde_json::json!(self.queue.len()));
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourney_domain::message::ToolCall;
    use tourney_providers::mock::{MockProvider, ScriptedTurn};

    async fn agent_at(path: &Path) -> MainAgent {
        let tools = Arc::new(ToolRegistry::new());
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new(
            "mock",
            vec![ScriptedTurn::ToolCalls(vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "complete_task".into(),
                arguments: serde_json::json!({"reason": "paused", "summary": "s"}),
            }])],
        ));
        MainAgent::new(AgentConfig::default(), provider, tools, ToolPolicy::default(), path).await
    }

    #[tokio::test]
    async fn complete_task_pauses_rather_than_stops_the_loop() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let main = agent_at(&state_path).await;

        let status = main.run_continuous(None, Some(3)).await;
        assert_eq!(status, AgentStatus::Stopped);
        assert_eq!(main.loop_count(), 3);
        assert!(!main.agent().is_completed());
    }

    #[tokio::test]
    async fn queued_prompts_are_injected_and_drained() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let main = agent_at(&state_path).await;

        main.queue_prompt("hello there", Priority::Normal);
        assert_eq!(main.queued_prompts().len(), 1);

        let _ = main.run_continuous(None, Some(1)).await;
        assert!(main.queued_prompts().is_empty());

        let messages = main.agent().context().get_messages_for_api();
        let joined: String = messages.iter().map(|m| m.content.extract_all_text()).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("hello there"));
    }

    #[tokio::test]
    async fn loop_count_persists_across_instances() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        {
            let main = agent_at(&state_path).await;
            let _ = main.run_continuous(None, Some(2)).await;
            assert_eq!(main.loop_count(), 2);
        }

        let reloaded = agent_at(&state_path).await;
        assert_eq!(reloaded.loop_count(), 2);
    }

    #[tokio::test]
    async fn restart_resets_loop_count_and_clears_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let main = agent_at(&state_path).await;
        let _ = main.run_continuous(None, Some(2)).await;
        assert_eq!(main.loop_count(), 2);

        main.restart(Some("start over".into()), false);
        assert_eq!(main.loop_count(), 0);
        let messages = main.agent().context().get_messages_for_api();
        // system message + the restart notification
        assert_eq!(messages.len(), 2);
    }
}
