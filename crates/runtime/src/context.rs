//! Per-agent context window management: tracks the running message log,
//! estimates token usage, and compacts the log via LLM summarization once
//! usage crosses a configurable threshold.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use tourney_domain::config::{THRESHOLD_MAX, THRESHOLD_MIN};
use tourney_domain::error::{Error, Result};
use tourney_domain::message::{Message, ToolCall};
use tourney_providers::{estimate_message_tokens, simple_completion, LlmProvider};

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a precise summarizer. Extract and preserve all actionable information.";
const SUMMARIZER_MAX_TOKENS: u32 = 2048;

struct ContextState {
    system_prompt: String,
    messages: Vec<Message>,
    compaction_count: u32,
    last_compacted_at: Option<DateTime<Utc>>,
}

/// Manages one agent's rolling context: the system prompt plus every
/// subsequent turn, with automatic summarization once the estimated token
/// count crosses `threshold * max_tokens`.
pub struct ContextManager {
    state: Mutex<ContextState>,
    max_tokens: u32,
    threshold: Mutex<f32>,
    preserve_recent: usize,
}

impl ContextManager {
    pub fn new(max_tokens: u32, threshold: f32, preserve_recent: usize) -> Self {
        Self {
            state: Mutex::new(ContextState {
                system_prompt: String::new(),
                messages: Vec::new(),
                compaction_count: 0,
                last_compacted_at: None,
            }),
            max_tokens,
            threshold: Mutex::new(threshold),
            preserve_recent,
        }
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.state.lock().system_prompt = prompt.into();
    }

    pub fn append_user(&self, text: impl Into<String>) {
        self.state.lock().messages.push(Message::user(text));
    }

    pub fn append_assistant(&self, text: impl Into<String>) {
        self.state.lock().messages.push(Message::assistant(text));
    }

    pub fn append_tool_call(&self, calls: &[ToolCall]) {
        self.state.lock().messages.push(Message::assistant_tool_calls(calls));
    }

    pub fn append_tool_result(&self, tool_use_id: impl Into<String>, content: impl Into<String>) {
        self.state.lock().messages.push(Message::tool_result(tool_use_id, content));
    }

    /// Inject a `[SYSTEM NOTIFICATION]`-prefixed message outside the
    /// ordinary user/assistant turn-taking — used for compaction notices and
    /// scheduler-driven nudges.
    pub fn append_system_notification(&self, content: impl Into<String>) {
        self.state.lock().messages.push(Message::system_notification(content));
    }

    /// The full message log as it should be sent to the provider: the
    /// system prompt followed by every subsequent turn.
    pub fn get_messages_for_api(&self) -> Vec<Message> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.messages.len() + 1);
        out.push(Message::system(state.system_prompt.clone()));
        out.extend(state.messages.iter().cloned());
        out
    }

    fn usage_percent_locked(&self, state: &ContextState) -> f32 {
        let mut all = vec![Message::system(state.system_prompt.clone())];
        all.extend(state.messages.iter().cloned());
        let tokens = estimate_message_tokens(&all);
        tokens as f32 / self.max_tokens as f32
    }

    pub fn usage_percent(&self) -> f32 {
        self.usage_percent_locked(&self.state.lock())
    }

    pub fn needs_compaction(&self) -> bool {
        self.usage_percent() > *self.threshold.lock()
    }

    /// Change the compaction threshold. Rejects values outside `[0.5, 0.95]`
    /// by returning `false` rather than erroring, matching the tolerant
    /// behavior callers (the `manage_context` tool) rely on.
    pub fn set_threshold(&self, threshold: f32) -> bool {
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold) {
            return false;
        }
        *self.threshold.lock() = threshold;
        true
    }

    pub fn threshold(&self) -> f32 {
        *self.threshold.lock()
    }

    pub fn get_status(&self) -> Value {
        let state = self.state.lock();
        let tokens = {
            let mut all = vec![Message::system(state.system_prompt.clone())];
            all.extend(state.messages.iter().cloned());
            estimate_message_tokens(&all)
        };
        serde_json::json!({
            "estimated_tokens": tokens,
            "max_tokens": self.max_tokens,
            "usage_percent": self.usage_percent_locked(&state),
            "threshold": *self.threshold.lock(),
            "message_count": state.messages.len(),
            "compaction_count": state.compaction_count,
            "last_compacted_at": state.last_compacted_at.map(|t| t.to_rfc3339()),
            "needs_compaction": self.usage_percent_locked(&state) > *self.threshold.lock(),
        })
    }

    pub fn compaction_count(&self) -> u32 {
        self.state.lock().compaction_count
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.messages.clear();
        state.compaction_count = 0;
        state.last_compacted_at = None;
    }

    /// Summarize everything but the most recent `preserve_recent` messages
    /// and splice the summary back in as a single assistant turn.
    ///
    /// Messages are split into a middle section (summarized) and a recent
    /// tail (kept verbatim). When the log is no longer than
    /// `preserve_recent`, there is nothing to summarize and this is a no-op.
    pub async fn compact(&self, provider: &dyn LlmProvider, summarizer_model: Option<String>) -> Result<()> {
        let (system_prompt, middle, recent) = {
            let state = self.state.lock();
            if state.messages.len() <= self.preserve_recent {
                (state.system_prompt.clone(), Vec::new(), state.messages.clone())
            } else {
                let split_at = state.messages.len() - self.preserve_recent;
                (
                    state.system_prompt.clone(),
                    state.messages[..split_at].to_vec(),
                    state.messages[split_at..].to_vec(),
                )
            }
        };

        if middle.is_empty() {
            return Ok(());
        }

        let summary_prompt = build_summary_prompt(&middle);
        let summary = simple_completion(provider, SUMMARIZER_SYSTEM_PROMPT, summary_prompt, summarizer_model, Some(SUMMARIZER_MAX_TOKENS))
            .await
            .map_err(|e| Error::provider("summarizer", format!("compaction summary call failed: {e}")))?;

        if summary.trim().is_empty() {
            return Err(Error::provider("summarizer", "compaction summary was empty; leaving log unmodified"));
        }

        let mut state = self.state.lock();
        state.compaction_count += 1;
        let summary_text = format!("[CONTEXT SUMMARY - Compaction #{}]\n\n{}", state.compaction_count, summary);

        let mut rebuilt = vec![Message::assistant(summary_text)];
        rebuilt.extend(recent);
        state.messages = rebuilt;
        state.last_compacted_at = Some(Utc::now());
        let _ = system_prompt;

        Ok(())
    }
}

/// Build the summarization prompt: the 6 preservation categories a
/// compaction summary must cover, followed by the transcript being
/// compacted.
fn build_summary_prompt(middle: &[Message]) -> String {
    let transcript: Vec<String> = middle
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content.extract_all_text()))
        .collect();

    format!(
        "Summarize the following conversation segment, preserving:\n\
         1. CURRENT GOAL - what the agent is trying to accomplish\n\
         2. KEY DECISIONS - choices made and their rationale\n\
         3. PENDING TASKS - work not yet completed\n\
         4. IMPORTANT FACTS - specific values, paths, names, numbers referenced\n\
         5. RECENT PROGRESS - what has been accomplished so far\n\
         6. FAILED ATTEMPTS - approaches that did not work and why\n\n\
         Conversation segment:\n{}",
        transcript.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourney_providers::mock::MockProvider;

    fn manager() -> ContextManager {
        let cm = ContextManager::new(1000, 0.85, 2);
        cm.set_system_prompt("you are an agent");
        cm
    }

    #[test]
    fn needs_compaction_false_when_under_threshold() {
        let cm = manager();
        cm.append_user("hi");
        assert!(!cm.needs_compaction());
    }

    #[test]
    fn needs_compaction_true_when_over_threshold() {
        let cm = ContextManager::new(50, 0.5, 2);
        cm.set_system_prompt("sys");
        for _ in 0..20 {
            cm.append_user("this is a reasonably long message to pad out token usage");
        }
        assert!(cm.needs_compaction());
    }

    #[test]
    fn set_threshold_rejects_out_of_range() {
        let cm = manager();
        assert!(!cm.set_threshold(0.1));
        assert!(!cm.set_threshold(0.99));
        assert_eq!(cm.threshold(), 0.85);
        assert!(cm.set_threshold(0.6));
        assert_eq!(cm.threshold(), 0.6);
    }

    #[tokio::test]
    async fn compact_is_noop_when_log_shorter_than_preserve_recent() {
        let cm = manager();
        cm.append_user("only one message");
        let provider = MockProvider::echoing("m", "summary");
        cm.compact(&provider, None).await.unwrap();
        assert_eq!(cm.compaction_count(), 0);
    }

    #[tokio::test]
    async fn compact_rebuilds_log_with_summary_and_recent_tail() {
        let cm = ContextManager::new(1000, 0.85, 2);
        cm.set_system_prompt("sys");
        for i in 0..6 {
            cm.append_user(format!("message {i}"));
        }
        let provider = MockProvider::echoing("m", "the summary text");
        cm.compact(&provider, None).await.unwrap();

        assert_eq!(cm.compaction_count(), 1);
        let messages = cm.get_messages_for_api();
        // system + summary + 2 preserved recent messages
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content.extract_all_text().contains("Compaction #1"));
        assert!(messages[1].content.extract_all_text().contains("the summary text"));
        assert!(messages[3].content.extract_all_text().contains("message 5"));
    }

    #[tokio::test]
    async fn compact_rejects_empty_summary_and_leaves_log_untouched() {
        let cm = ContextManager::new(1000, 0.85, 2);
        cm.set_system_prompt("sys");
        for i in 0..6 {
            cm.append_user(format!("message {i}"));
        }
        let before = serde_json::to_value(cm.get_messages_for_api()).unwrap();

        let provider = MockProvider::echoing("m", "");
        let result = cm.compact(&provider, None).await;

        assert!(result.is_err());
        assert_eq!(cm.compaction_count(), 0);
        assert_eq!(serde_json::to_value(cm.get_messages_for_api()).unwrap(), before);
    }

    #[tokio::test]
    async fn compact_increments_count_across_multiple_calls() {
        let cm = ContextManager::new(1000, 0.85, 1);
        cm.set_system_prompt("sys");
        for i in 0..5 {
            cm.append_user(format!("m{i}"));
        }
        let provider = MockProvider::echoing("m", "s1");
        cm.compact(&provider, None).await.unwrap();
        for i in 0..5 {
            cm.append_user(format!("n{i}"));
        }
        cm.compact(&provider, None).await.unwrap();
        assert_eq!(cm.compaction_count(), 2);
    }
}
