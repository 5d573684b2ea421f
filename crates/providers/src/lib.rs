pub mod mock;
pub mod openai_compat;
pub mod tokens;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use tokens::estimate_message_tokens;
pub use traits::{simple_completion, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
