//! Bounded dialogue memory
//!
//! Rolling list of user/assistant messages consumed by the chat adapter on
//! each turn. The session system prompt lives outside the rolling list: the
//! cap counts only user/assistant entries, and changing the prompt
//! mid-session preserves them all.

use crate::llm::{Message, Role};

/// Default cap on user/assistant entries kept in memory
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Ordered, bounded conversation history
pub struct ConversationHistory {
    system_prompt: String,
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationHistory {
    /// Create a history with the given system prompt and entry cap
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, max_messages: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Append one entry and trim to the cap.
    ///
    /// A `System` entry replaces the session prompt instead of joining the
    /// rolling list; prior user/assistant entries are preserved.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        if content.is_empty() {
            return;
        }

        if role == Role::System {
            self.system_prompt = content;
            return;
        }

        self.messages.push(Message { role, content });
        self.trim();
    }

    /// Drop the oldest entries beyond the cap, then drop a leading
    /// assistant message so the remaining suffix begins with a user turn.
    pub fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }

        if self.messages.first().is_some_and(|m| m.role == Role::Assistant) {
            self.messages.remove(0);
        }
    }

    /// Immutable copy of the dialogue: system prompt first, then every
    /// retained entry in insertion order. This is what each chat call sees.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }

    /// Remove all user/assistant entries, keeping the system prompt
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Retained user/assistant entries, oldest first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of retained user/assistant entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current session system prompt
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
