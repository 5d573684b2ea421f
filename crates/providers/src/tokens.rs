//! Token estimation.
//!
//! Providers do not expose a tokenizer before a call completes, so the
//! context manager needs a cheap, deterministic, monotone stand-in to decide
//! whether compaction is due. This mirrors the common ~4-chars-per-token
//! heuristic plus a small per-message framing overhead.

use tourney_domain::message::Message;

const CHARS_PER_TOKEN: usize = 4;
/// Approximates the role/delimiter overhead each message costs in the wire format.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count of a single block of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the total token count of a message log.
pub fn estimate_message_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| PER_MESSAGE_OVERHEAD + estimate_tokens(&m.content.extract_all_text()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_is_monotone_in_length() {
        assert!(estimate_tokens("a") <= estimate_tokens("aaaa"));
        assert!(estimate_tokens("aaaa") <= estimate_tokens("aaaaaaaa"));
    }

    #[test]
    fn estimate_tokens_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_message_tokens_grows_with_message_count() {
        let one = vec![Message::user("hello")];
        let two = vec![Message::user("hello"), Message::user("hello")];
        assert!(estimate_message_tokens(&two) > estimate_message_tokens(&one));
    }

    #[test]
    fn estimate_message_tokens_deterministic() {
        let msgs = vec![Message::system("sys"), Message::user("hello world")];
        let a = estimate_message_tokens(&msgs);
        let b = estimate_message_tokens(&msgs);
        assert_eq!(a, b);
    }
}
