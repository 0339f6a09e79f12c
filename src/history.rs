//! Bounded conversation history.
//!
//! Stores question/answer turns in order. Turns are only ever appended in
//! user/assistant pairs, and the oldest turns are evicted once the log
//! grows past `max_turns`, so the length stays even and bounded.
//!
//! The type itself is not synchronised; the pipeline keeps it behind a
//! mutex so that concurrent queries append whole pairs.

use std::collections::VecDeque;

use crate::models::ConversationTurn;

/// Ten question/answer pairs.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Confirmation returned by [`ConversationHistory::clear`].
pub const CLEARED_MESSAGE: &str = "对话历史已清空";

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationHistory {
    /// `max_turns` is rounded down to an even number, minimum 2.
    pub fn new(max_turns: usize) -> Self {
        let max_turns = (max_turns - max_turns % 2).max(2);
        Self {
            turns: VecDeque::with_capacity(max_turns + 2),
            max_turns,
        }
    }

    /// Append a user turn and an assistant turn, then evict the oldest
    /// turns beyond the bound.
    pub fn append(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(ConversationTurn::user(question));
        self.turns.push_back(ConversationTurn::assistant(answer));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Snapshot of all turns, oldest first.
    pub fn all(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) -> &'static str {
        self.turns.clear();
        CLEARED_MESSAGE
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_append_adds_pair_in_order() {
        let mut history = ConversationHistory::default();
        history.append("问题", "回答");
        let turns = history.all();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "问题");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "回答");
    }

    #[test]
    fn test_bound_evicts_oldest_pairs() {
        let mut history = ConversationHistory::default();
        for i in 0..15 {
            history.append(format!("q{}", i), format!("a{}", i));
            assert!(history.len() <= DEFAULT_MAX_TURNS);
            assert_eq!(history.len() % 2, 0);
        }
        let turns = history.all();
        assert_eq!(turns.len(), 20);
        assert_eq!(turns[0].content, "q5");
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[19].content, "a14");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut history = ConversationHistory::default();
        history.append("q", "a");
        assert_eq!(history.clear(), CLEARED_MESSAGE);
        assert!(history.all().is_empty());
        assert_eq!(history.clear(), CLEARED_MESSAGE);
        assert!(history.is_empty());
    }

    #[test]
    fn test_odd_bound_rounds_down() {
        let mut history = ConversationHistory::new(5);
        assert_eq!(history.max_turns(), 4);
        for i in 0..4 {
            history.append(format!("q{}", i), "a");
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.all()[0].content, "q2");
    }
}
