//! # Conversation History
//!
//! Ordered, append-only record of one interview. The history is replayed
//! verbatim as the language model's context, so insertion order matters and
//! turns are never edited once stored.

use serde::Serialize;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-attributed utterance. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    /// Returns `None` for blank text: the history never holds empty turns.
    pub fn new(role: Role, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self { role, text })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Per-session turn history, owned and mutated only by the session controller.
#[derive(Debug, Default)]
pub struct ConversationStore {
    turns: Vec<Turn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn; blank text is a no-op. Returns whether a turn was stored.
    pub fn append(&mut self, role: Role, text: impl Into<String>) -> bool {
        match Turn::new(role, text) {
            Some(turn) => {
                self.turns.push(turn);
                true
            }
            None => false,
        }
    }

    /// Owned copy of the history, safe to hand to a generator.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_is_ignored() {
        let mut store = ConversationStore::new();
        assert!(!store.append(Role::User, ""));
        assert!(!store.append(Role::User, "  \n\t"));
        assert_eq!(store.len(), 0);
        assert!(Turn::new(Role::Assistant, " ").is_none());
    }

    #[test]
    fn test_order_is_insertion_order() {
        let mut store = ConversationStore::new();
        store.append(Role::User, "hello");
        store.append(Role::Assistant, "Hi there");
        store.append(Role::User, "tell me about the role");

        let roles: Vec<Role> = store.snapshot().iter().map(Turn::role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(store.snapshot()[1].text(), "Hi there");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = ConversationStore::new();
        store.append(Role::User, "first");
        let snapshot = store.snapshot();
        store.append(Role::Assistant, "second");
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 0);
    }
}
