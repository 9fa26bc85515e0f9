use serde::{Deserialize, Serialize};
use std::fmt;

/// The two autonomous sub-session kinds. At most one of each may be active
/// per conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    AgenticRetrieval,
    LoreManagement,
}

impl SessionKind {
    pub const ALL: [SessionKind; 2] = [SessionKind::AgenticRetrieval, SessionKind::LoreManagement];

    /// Conversation metadata key holding this kind's checkpoint.
    pub fn metadata_key(self) -> &'static str {
        match self {
            SessionKind::AgenticRetrieval => "agentic_timeline_fill_session",
            SessionKind::LoreManagement => "lore_management_session",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionKind::AgenticRetrieval => "agentic timeline fill",
            SessionKind::LoreManagement => "lore management",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Minimal persisted record of an active session, enough to unwind it after a
/// crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheckpoint {
    pub active: bool,
    #[serde(default)]
    pub saved_profile_id: Option<String>,
    #[serde(default)]
    pub saved_profile_name: Option<String>,
    pub start_message_index: usize,
    /// `None` when the transcript had no visible messages to hide.
    #[serde(default)]
    pub hidden_message_start: Option<usize>,
    #[serde(default)]
    pub hidden_message_end: Option<usize>,
    #[serde(default)]
    pub session_chat_id: String,
}

impl SessionCheckpoint {
    pub fn hidden_range(&self) -> Option<(usize, usize)> {
        match (self.hidden_message_start, self.hidden_message_end) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        }
    }

    /// Whether the session was started in `chat_id`. Checkpoints written
    /// without a chat id match any conversation.
    pub fn belongs_to(&self, chat_id: &str) -> bool {
        self.session_chat_id.is_empty() || self.session_chat_id == chat_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_through_metadata_json() {
        let value = serde_json::json!({
            "active": true,
            "savedProfileId": "p1",
            "savedProfileName": "Main",
            "startMessageIndex": 10,
            "hiddenMessageStart": 0,
            "hiddenMessageEnd": 9,
            "sessionChatId": "chat-1"
        });
        let checkpoint: SessionCheckpoint = serde_json::from_value(value).unwrap();
        assert_eq!(checkpoint.hidden_range(), Some((0, 9)));
        assert_eq!(checkpoint.start_message_index, 10);
    }

    #[test]
    fn inverted_hidden_range_is_ignored() {
        let checkpoint = SessionCheckpoint {
            active: true,
            saved_profile_id: None,
            saved_profile_name: None,
            start_message_index: 0,
            hidden_message_start: Some(3),
            hidden_message_end: Some(1),
            session_chat_id: String::new(),
        };
        assert_eq!(checkpoint.hidden_range(), None);
        assert!(checkpoint.belongs_to("any-chat"));
    }

    #[test]
    fn checkpoint_is_bound_to_its_chat() {
        let checkpoint = SessionCheckpoint {
            active: true,
            saved_profile_id: None,
            saved_profile_name: None,
            start_message_index: 4,
            hidden_message_start: None,
            hidden_message_end: None,
            session_chat_id: "chat-1".to_string(),
        };
        assert!(checkpoint.belongs_to("chat-1"));
        assert!(!checkpoint.belongs_to("chat-2"));
    }

    #[test]
    fn kinds_use_distinct_metadata_keys() {
        assert_ne!(
            SessionKind::AgenticRetrieval.metadata_key(),
            SessionKind::LoreManagement.metadata_key()
        );
    }
}
