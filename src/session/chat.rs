use chrono::{DateTime, Local};
use std::fmt;
use uuid::Uuid;

use crate::models::{Role, Turn};

/// Opaque handle identifying one connection's conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Ordered conversation history owned by a single connection.
///
/// History is append-only. A configured window only limits what
/// [`ChatSession::build_request`] hands to the backend.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: SessionId,
    created_at: DateTime<Local>,
    history: Vec<Turn>,
    max_history_turns: Option<usize>,
}

impl ChatSession {
    /// Create a new session with an unbounded request window
    pub fn new() -> Self {
        Self::with_window(None)
    }

    /// Create a new session that sends at most `max_history_turns` recent turns
    pub fn with_window(max_history_turns: Option<usize>) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Local::now(),
            history: Vec::new(),
            max_history_turns,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Append a turn in arrival order
    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        self.history.push(Turn::new(role, text));
    }

    /// Payload for the next generation call.
    ///
    /// With a window configured, returns the most recent turns that fit,
    /// moved forward if needed so the slice opens on a user turn.
    pub fn build_request(&self) -> &[Turn] {
        let Some(limit) = self.max_history_turns else {
            return &self.history;
        };

        let mut start = self.history.len().saturating_sub(limit.max(1));
        while start + 1 < self.history.len() && self.history[start].role != Role::User {
            start += 1;
        }
        &self.history[start..]
    }

    /// Full history, oldest first
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Number of assistant replies recorded so far
    pub fn turn_count(&self) -> usize {
        self.history
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .count()
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
