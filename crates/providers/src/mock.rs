//! A deterministic in-memory provider, for tests and for running the
//! scheduler without a network dependency.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tourney_domain::capability::{LlmCapabilities, ToolSupport};
use tourney_domain::error::Result;
use tourney_domain::message::ToolCall;
use tourney_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// A scripted response: either plain text or a set of tool calls.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Replays a fixed script of responses in order, looping the last entry
/// once exhausted. Useful for driving an agent through a known sequence of
/// turns in a test without depending on network access.
pub struct MockProvider {
    id: String,
    script: Vec<ScriptedTurn>,
    cursor: AtomicUsize,
    capabilities: LlmCapabilities,
}

impl MockProvider {
    pub fn new(id: impl Into<String>, script: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.into(),
            script,
            cursor: AtomicUsize::new(0),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: false,
                supports_json_mode: true,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(4096),
            },
        }
    }

    /// A provider whose every turn returns the same plain-text response.
    pub fn echoing(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, vec![ScriptedTurn::Text(text.into())])
    }

    fn next_turn(&self) -> ScriptedTurn {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let idx = i.min(self.script.len().saturating_sub(1));
        self.script[idx].clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.unwrap_or_else(|| "mock-model".into());
        let usage = Some(Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        match self.next_turn() {
            ScriptedTurn::Text(content) => Ok(ChatResponse {
                content,
                tool_calls: vec![],
                usage,
                model,
                finish_reason: Some("stop".into()),
            }),
            ScriptedTurn::ToolCalls(tool_calls) => Ok(ChatResponse {
                content: String::new(),
                tool_calls,
                usage,
                model,
                finish_reason: Some("tool_calls".into()),
            }),
        }
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let events = vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let embeddings = req.input.iter().map(|_| vec![0.0_f32; 8]).collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoing_returns_same_text_every_call() {
        let p = MockProvider::echoing("m", "hi there");
        let r1 = p.chat(ChatRequest::default()).await.unwrap();
        let r2 = p.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(r1.content, "hi there");
        assert_eq!(r2.content, "hi there");
    }

    #[tokio::test]
    async fn script_advances_then_holds_last_entry() {
        let p = MockProvider::new(
            "m",
            vec![ScriptedTurn::Text("first".into()), ScriptedTurn::Text("second".into())],
        );
        assert_eq!(p.chat(ChatRequest::default()).await.unwrap().content, "first");
        assert_eq!(p.chat(ChatRequest::default()).await.unwrap().content, "second");
        assert_eq!(p.chat(ChatRequest::default()).await.unwrap().content, "second");
    }
}
