//! Conversation session state
//!
//! A session is the ordered, role-tagged message list for one conversation
//! plus the timestamps used for inactivity expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::memory::context_manager::trim_history;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message, shaped the way the completion API expects it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Identifies a conversation
///
/// Variants that key on the response id alone leave `participant_id` empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub participant_id: Option<String>,
    pub response_id: String,
}

impl SessionKey {
    pub fn response(response_id: impl Into<String>) -> Self {
        Self {
            participant_id: None,
            response_id: response_id.into(),
        }
    }

    pub fn participant_response(
        participant_id: impl Into<String>,
        response_id: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: Some(participant_id.into()),
            response_id: response_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.participant_id {
            Some(participant) => write!(f, "{}/{}", participant, self.response_id),
            None => f.write_str(&self.response_id),
        }
    }
}

/// Conversation state for one key
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    /// Always starts with the system prompt
    messages: Vec<ChatMessage>,
}

impl Session {
    /// Create a session seeded with the system prompt
    pub fn new(system_prompt: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn system_prompt(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// True once more than `timeout` has passed since the last exchange
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_active);
        match chrono::Duration::from_std(timeout) {
            Ok(limit) => idle > limit,
            Err(_) => false,
        }
    }

    /// Messages to forward upstream for a new user turn, trimmed to the window
    pub fn outbound_messages(&self, user_text: &str, max_exchanges: usize) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages);
        messages.push(ChatMessage::user(user_text));
        trim_history(&messages, max_exchanges)
    }

    /// Record one exchange
    ///
    /// The user turn is always kept. The assistant turn is appended only when
    /// the upstream call produced a reply.
    pub fn record_exchange(&mut self, user_text: &str, reply: Option<&str>, now: DateTime<Utc>) {
        self.messages.push(ChatMessage::user(user_text));
        if let Some(reply) = reply {
            self.messages.push(ChatMessage::assistant(reply));
        }
        self.last_active = now;
    }

    /// Drop turns beyond the retention window, keeping the system prompt
    pub fn trim(&mut self, max_exchanges: usize) {
        self.messages = trim_history(&self.messages, max_exchanges);
    }
}
