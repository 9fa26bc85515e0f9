use std::sync::atomic::Ordering;

use serde_json::Value;

use super::InMemoryHost;
use crate::error::HostError;
use crate::host::{HostEvent, NoticeLevel};
use crate::model::{ChatMessage, ToolInvocation};

/// One scripted model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Plain prose, no tool call.
    Text(String),
    ToolCall { name: String, arguments: Value },
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        ModelTurn::Text(text.into())
    }

    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        ModelTurn::ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

struct GeneratingGuard<'a>(&'a InMemoryHost);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.generating.store(false, Ordering::SeqCst);
        self.0.stop_requested.store(false, Ordering::SeqCst);
    }
}

impl InMemoryHost {
    /// Plays scripted turns the way a chat host does: non-stealth tool calls
    /// are recorded and generation auto-continues; a stealth tool ends the
    /// generation silently; prose ends it with `GenerationEnded`.
    pub(super) async fn run_generation(&self, replace_last: bool) -> Result<(), HostError> {
        self.generating.store(true, Ordering::SeqCst);
        let _guard = GeneratingGuard(self);
        let mut replace_last = replace_last;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return Ok(());
            }
            let Some(turn) = self.turns.lock().pop_front() else {
                return Err(HostError::Command {
                    command: "/trigger".to_string(),
                    message: "model produced no reply".to_string(),
                });
            };
            self.counters.generations.fetch_add(1, Ordering::SeqCst);

            match turn {
                ModelTurn::Text(text) => {
                    let index = self.write_reply(text, replace_last);
                    self.events.emit(HostEvent::GenerationEnded(index));
                    return Ok(());
                }
                ModelTurn::ToolCall { name, arguments } => {
                    let routed = self.tools.as_ref().and_then(|tools| tools.routable(&name));
                    let Some(tool) = routed else {
                        let index = self.write_reply(
                            format!("[unavailable tool call: {}]", name),
                            replace_last,
                        );
                        self.events.emit(HostEvent::GenerationEnded(index));
                        return Ok(());
                    };

                    if let Some(message) = &tool.format_message {
                        self.notices.lock().push((NoticeLevel::Info, message.clone()));
                    }
                    let result = match tool.tool.execute(arguments.clone()).await {
                        Ok(result) => result.result,
                        Err(err) => err.to_string(),
                    };

                    if tool.stealth {
                        return Ok(());
                    }

                    let character = self.conversation.read().character_name().to_string();
                    let index = self.push_message(ChatMessage::tool_calls(
                        character,
                        vec![ToolInvocation {
                            name,
                            parameters: arguments,
                            result,
                            id: None,
                        }],
                    ));
                    self.events.emit(HostEvent::GenerationEnded(index));
                    replace_last = false;
                }
            }
        }
    }

    fn write_reply(&self, text: String, replace_last: bool) -> usize {
        let mut conversation = self.conversation.write();
        let character = conversation.character_name().to_string();
        let replaceable = conversation
            .messages
            .last()
            .is_some_and(|last| !last.is_user && !last.has_tool_calls());
        if replace_last && replaceable {
            let index = conversation.messages.len() - 1;
            conversation.messages[index].mes = text;
            index
        } else {
            conversation
                .messages
                .push(ChatMessage::character(character, text));
            conversation.messages.len() - 1
        }
    }
}
