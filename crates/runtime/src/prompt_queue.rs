//! A small priority queue of user messages waiting to be injected into the
//! main agent's context at the start of its next loop iteration.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPrompt {
    pub id: String,
    pub prompt: String,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
}

/// FIFO for normal-priority prompts, with high-priority prompts jumping to
/// the front. Draining happens one prompt at a time, oldest (of its
/// priority band) first.
#[derive(Default)]
pub struct PromptQueue {
    items: Mutex<VecDeque<QueuedPrompt>>,
}

impl PromptQueue {
    pub fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }

    /// Enqueue a prompt, returning its id. High priority prompts are placed
    /// at the front of the queue; normal priority prompts at the back.
    pub fn enqueue(&self, prompt: impl Into<String>, priority: Priority) -> String {
        let id = format!("prompt_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let entry = QueuedPrompt { id: id.clone(), prompt: prompt.into(), priority, queued_at: Utc::now() };

        let mut items = self.items.lock();
        match priority {
            Priority::High => items.push_front(entry),
            Priority::Normal => items.push_back(entry),
        }
        id
    }

    /// Pop the next prompt to inject, if any.
    pub fn pop(&self) -> Option<QueuedPrompt> {
        self.items.lock().pop_front()
    }

    pub fn list(&self) -> Vec<QueuedPrompt> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock();
        if let Some(pos) = items.iter().position(|p| p.id == id) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_priority_is_fifo() {
        let q = PromptQueue::new();
        q.enqueue("first", Priority::Normal);
        q.enqueue("second", Priority::Normal);
        assert_eq!(q.pop().unwrap().prompt, "first");
        assert_eq!(q.pop().unwrap().prompt, "second");
        assert!(q.pop().is_none());
    }

    #[test]
    fn high_priority_jumps_the_queue() {
        let q = PromptQueue::new();
        q.enqueue("normal one", Priority::Normal);
        q.enqueue("urgent", Priority::High);
        assert_eq!(q.pop().unwrap().prompt, "urgent");
        assert_eq!(q.pop().unwrap().prompt, "normal one");
    }

    #[test]
    fn remove_by_id() {
        let q = PromptQueue::new();
        let id = q.enqueue("removable", Priority::Normal);
        assert!(q.remove(&id));
        assert!(q.pop().is_none());
        assert!(!q.remove("missing"));
    }

    #[test]
    fn clear_empties_the_queue() {
        let q = PromptQueue::new();
        q.enqueue("a", Priority::Normal);
        q.enqueue("b", Priority::High);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn list_preserves_order_without_draining() {
        let q = PromptQueue::new();
        q.enqueue("a", Priority::Normal);
        q.enqueue("b", Priority::Normal);
        assert_eq!(q.list().len(), 2);
        assert_eq!(q.len(), 2);
    }
}
