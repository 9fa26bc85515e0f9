use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Record of a tool call the host executed on the model's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Per-message extension data. Unknown keys written by other extensions are
/// preserved in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageExtra {
    /// This message is the sealed end of a chapter.
    #[serde(default, skip_serializing_if = "is_false")]
    pub rmr_chapter: bool,
    /// Legacy marker superseded by `rmr_chapter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmr_scene: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A transcript entry as the host stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_user: bool,
    /// The host uses this flag to hide a message from prompts.
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub mes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_date: Option<String>,
    #[serde(default)]
    pub extra: MessageExtra,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ChatMessage {
    fn build(name: impl Into<String>, text: impl Into<String>, is_user: bool) -> Self {
        Self {
            name: name.into(),
            is_user,
            is_system: false,
            mes: text.into(),
            send_date: Some(Utc::now().to_rfc3339()),
            extra: MessageExtra::default(),
            other: Map::new(),
        }
    }

    pub fn user(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::build(name, text, true)
    }

    pub fn character(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::build(name, text, false)
    }

    /// A hidden entry recording tool calls the host executed.
    pub fn tool_calls(name: impl Into<String>, invocations: Vec<ToolInvocation>) -> Self {
        let mut message = Self::build(name, String::new(), false);
        message.is_system = true;
        message.extra.tool_invocations = Some(invocations);
        message
    }

    pub fn is_hidden(&self) -> bool {
        self.is_system
    }

    pub fn has_tool_calls(&self) -> bool {
        self.extra
            .tool_invocations
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    pub fn is_chapter_end(&self) -> bool {
        self.extra.rmr_chapter
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterCard {
    pub name: String,
    /// World-info book bound to this character.
    #[serde(default)]
    pub world: Option<String>,
}

/// The host's current conversation: transcript plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub character: Option<CharacterCard>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Conversation {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn character_name(&self) -> &str {
        self.character
            .as_ref()
            .map(|card| card.name.as_str())
            .unwrap_or("Assistant")
    }

    /// Index of the earliest message that is not hidden.
    pub fn first_visible_index(&self) -> Option<usize> {
        self.messages.iter().position(|message| !message.is_hidden())
    }

    pub fn last_index(&self) -> Option<usize> {
        self.messages.len().checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extra_keys_survive_round_trip() {
        let raw = serde_json::json!({
            "name": "Alice",
            "is_user": true,
            "is_system": false,
            "mes": "hi",
            "extra": { "rmr_chapter": true, "bias": "x" },
            "swipe_id": 0
        });
        let message: ChatMessage = serde_json::from_value(raw).unwrap();
        assert!(message.is_chapter_end());
        assert_eq!(message.extra.other["bias"], "x");

        let back = serde_json::to_value(&message).unwrap();
        assert_eq!(back["extra"]["bias"], "x");
        assert_eq!(back["swipe_id"], 0);
    }

    #[test]
    fn first_visible_index_skips_hidden_prefix() {
        let mut conversation = Conversation::new("c");
        let mut hidden = ChatMessage::user("u", "a");
        hidden.is_system = true;
        conversation.messages.push(hidden);
        conversation.messages.push(ChatMessage::character("c", "b"));
        assert_eq!(conversation.first_visible_index(), Some(1));
        assert_eq!(conversation.last_index(), Some(1));
    }

    #[test]
    fn tool_call_messages_are_hidden() {
        let message = ChatMessage::tool_calls(
            "Assistant",
            vec![ToolInvocation {
                name: "list_entries".to_string(),
                parameters: Value::Null,
                result: "[]".to_string(),
                id: None,
            }],
        );
        assert!(message.is_hidden());
        assert!(message.has_tool_calls());
    }
}
