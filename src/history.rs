//! Conversation history
//!
//! Bounded, ordered log of user/assistant turns. The whole log is rewritten
//! to disk after every mutation so the dashboard always sees a complete file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person speaking to the assistant
    User,
    /// The model's reply
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged message
///
/// Timestamps are local wall-clock time without an offset, the format the
/// dashboard reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: NaiveDateTime,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now().naive_local(),
        }
    }
}

/// Ordered, bounded turn log with optional file persistence
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    path: Option<PathBuf>,
}

impl ConversationHistory {
    /// History that lives only in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load history from `path`
    ///
    /// A missing file yields an empty history; an unreadable one is logged and
    /// also yields an empty history. Later saves go to `path` either way.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let turns = match read_turns(&path) {
            Ok(turns) => {
                tracing::info!(turns = turns.len(), path = %path.display(), "loaded conversation history");
                turns
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to load conversation history");
                VecDeque::new()
            }
        };

        Self {
            turns,
            path: Some(path),
        }
    }

    /// Append a turn, evict the oldest beyond `2 * max_turns`, and persist
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails; the in-memory log is updated regardless
    pub fn push(&mut self, turn: ConversationTurn, max_turns: usize) -> Result<()> {
        self.turns.push_back(turn);
        self.enforce_bound(max_turns);
        self.save()
    }

    /// Append a user/assistant pair as one mutation
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    pub fn record_exchange(&mut self, user: &str, assistant: &str, max_turns: usize) -> Result<()> {
        self.turns.push_back(ConversationTurn::new(Role::User, user));
        self.turns
            .push_back(ConversationTurn::new(Role::Assistant, assistant));
        self.enforce_bound(max_turns);
        self.save()
    }

    /// Apply the `2 * max_turns` bound outside of an append
    ///
    /// Persists only when turns were evicted. Returns how many were.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    pub fn trim(&mut self, max_turns: usize) -> Result<usize> {
        let evicted = self.enforce_bound(max_turns);
        if evicted > 0 {
            self.save()?;
        }
        Ok(evicted)
    }

    fn enforce_bound(&mut self, max_turns: usize) -> usize {
        let limit = max_turns.saturating_mul(2);
        let excess = self.turns.len().saturating_sub(limit);
        if excess > 0 {
            self.turns.drain(..excess);
            tracing::debug!(evicted = excess, limit, "trimmed conversation history");
        }
        excess
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    /// All turns, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop every turn and persist the empty log
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    pub fn clear(&mut self) -> Result<()> {
        self.turns.clear();
        self.save()
    }

    /// Rewrite the persisted file in full
    ///
    /// # Errors
    ///
    /// Returns error if serialization or writing fails
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.turns)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::History(format!("replace {}: {e}", path.display())))?;

        Ok(())
    }
}

fn read_turns(path: &Path) -> Result<VecDeque<ConversationTurn>> {
    if !path.exists() {
        return Ok(VecDeque::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(history: &ConversationHistory) -> Vec<String> {
        history.turns().map(|t| t.content.clone()).collect()
    }

    #[test]
    fn test_bound_keeps_most_recent_in_order() {
        let mut history = ConversationHistory::in_memory();
        for i in 0..9 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            history
                .push(ConversationTurn::new(role, format!("t{i}")), 2)
                .unwrap();
            assert!(history.len() <= 4);
        }

        assert_eq!(contents(&history), vec!["t5", "t6", "t7", "t8"]);
    }

    #[test]
    fn test_shrinking_max_turns_evicts_on_next_mutation() {
        let mut history = ConversationHistory::in_memory();
        for i in 0..5 {
            history
                .record_exchange(&format!("q{i}"), &format!("a{i}"), 10)
                .unwrap();
        }
        assert_eq!(history.len(), 10);

        history.record_exchange("q5", "a5", 1).unwrap();
        assert_eq!(contents(&history), vec!["q5", "a5"]);
    }

    #[test]
    fn test_trim_applies_bound_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation_history.json");

        let mut history = ConversationHistory::load(&path);
        for i in 0..4 {
            history
                .record_exchange(&format!("q{i}"), &format!("a{i}"), 10)
                .unwrap();
        }

        assert_eq!(history.trim(10).unwrap(), 0);
        assert_eq!(history.trim(1).unwrap(), 6);
        assert_eq!(contents(&history), vec!["q3", "a3"]);
        assert_eq!(contents(&ConversationHistory::load(&path)), vec!["q3", "a3"]);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut history = ConversationHistory::in_memory();
        for i in 0..3 {
            history
                .record_exchange(&format!("q{i}"), &format!("a{i}"), 10)
                .unwrap();
        }

        let tail: Vec<_> = history.recent(3).map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["a1", "q2", "a2"]);
        assert_eq!(history.recent(100).count(), 6);
    }

    #[test]
    fn test_persisted_after_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("conversation_history.json");

        let mut history = ConversationHistory::load(&path);
        assert!(history.is_empty());

        history.record_exchange("jasper hi", "hello", 10).unwrap();
        let reloaded = ConversationHistory::load(&path);
        assert_eq!(contents(&reloaded), vec!["jasper hi", "hello"]);
        assert_eq!(reloaded.turns().next().unwrap().role, Role::User);

        history.clear().unwrap();
        assert!(ConversationHistory::load(&path).is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation_history.json");
        std::fs::write(&path, "[{ broken").unwrap();

        let history = ConversationHistory::load(&path);
        assert!(history.is_empty());
    }

    #[test]
    fn test_reads_naive_timestamps() {
        let json = r#"[{"role": "user", "content": "jasper hi", "timestamp": "2024-03-01T08:15:30.123456"}]"#;
        let turns: VecDeque<ConversationTurn> = serde_json::from_str(json).unwrap();
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].timestamp.to_string(), "2024-03-01 08:15:30.123456");
    }

    #[test]
    fn test_role_wire_format() {
        let turn = ConversationTurn::new(Role::Assistant, "ok");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json["timestamp"].is_string());
    }
}
