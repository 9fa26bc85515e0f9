use super::chat::SharedConversation;

/// Host-side prompt text processing.
pub trait PromptFormatter: Send + Sync {
    /// Applies persona substitutions (`{{user}}`, `{{char}}`, ...).
    fn substitute(&self, text: &str) -> String;

    /// Applies the host's per-message text transforms for prompt use.
    fn transform_message(&self, text: &str, _is_user: bool) -> String {
        text.to_string()
    }
}

/// Substitutes `{{user}}` and `{{char}}` from the live conversation.
pub struct PersonaFormatter {
    conversation: SharedConversation,
}

impl PersonaFormatter {
    pub fn new(conversation: SharedConversation) -> Self {
        Self { conversation }
    }
}

impl PromptFormatter for PersonaFormatter {
    fn substitute(&self, text: &str) -> String {
        let conversation = self.conversation.read();
        let user = if conversation.user_name.is_empty() {
            "User"
        } else {
            conversation.user_name.as_str()
        };
        text.replace("{{user}}", user)
            .replace("{{char}}", conversation.character_name())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::model::{CharacterCard, Conversation};

    #[test]
    fn substitutes_persona_names() {
        let mut conversation = Conversation::new("c");
        conversation.user_name = "Mara".to_string();
        conversation.character = Some(CharacterCard {
            name: "Vex".to_string(),
            world: None,
        });
        let formatter = PersonaFormatter::new(Arc::new(RwLock::new(conversation)));

        assert_eq!(formatter.substitute("{{user}} meets {{char}}"), "Mara meets Vex");
    }
}
