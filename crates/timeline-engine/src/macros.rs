//! Read-only projections the host substitutes into prompts.

use std::sync::Arc;

use timeline_core::host::MacroRegistrar;

use crate::results::FillResults;
use crate::timeline::Timeline;

pub const TIMELINE: &str = "timeline";
pub const CHAPTER: &str = "chapter";
pub const CHAPTER_SUMMARY: &str = "chapterSummary";
pub const TIMELINE_RESPONSES: &str = "timelineResponses";
pub const CURRENT_CHAT: &str = "currentChat";
pub const LAST_MESSAGE_ID: &str = "lastMessageId";
pub const FIRST_INCLUDED_MESSAGE_ID: &str = "firstIncludedMessageId";

pub const ALL: [&str; 7] = [
    TIMELINE,
    CHAPTER,
    CHAPTER_SUMMARY,
    TIMELINE_RESPONSES,
    CURRENT_CHAT,
    LAST_MESSAGE_ID,
    FIRST_INCLUDED_MESSAGE_ID,
];

#[derive(Clone)]
pub struct MacroRegistry {
    timeline: Timeline,
    results: FillResults,
}

impl MacroRegistry {
    pub fn new(timeline: Timeline, results: FillResults) -> Self {
        Self { timeline, results }
    }

    /// Current value of a macro, or `None` for names this registry does not own.
    pub fn value(&self, name: &str) -> Option<String> {
        Some(match name {
            TIMELINE => self.timeline.timeline_json(),
            CHAPTER => self.all_chapters(),
            CHAPTER_SUMMARY => self.all_summaries(),
            TIMELINE_RESPONSES => self.results.format_for_injection(),
            CURRENT_CHAT => self.timeline.current_chat_content().unwrap_or_default(),
            LAST_MESSAGE_ID => self
                .timeline
                .store()
                .message_count()
                .saturating_sub(1)
                .to_string(),
            FIRST_INCLUDED_MESSAGE_ID => self.first_included_message_id().to_string(),
            _ => return None,
        })
    }

    /// Expands every owned `{{macro}}` in `text`.
    pub fn expand(&self, text: &str) -> String {
        let mut expanded = text.to_string();
        for name in ALL {
            let token = format!("{{{{{}}}}}", name);
            if expanded.contains(&token) {
                let value = self.value(name).unwrap_or_default();
                expanded = expanded.replace(&token, &value);
            }
        }
        expanded
    }

    pub fn register(&self, registrar: &dyn MacroRegistrar) {
        for name in ALL {
            let registry = self.clone();
            registrar.register_macro(
                name,
                Arc::new(move || registry.value(name).unwrap_or_default()),
            );
        }
    }

    fn all_chapters(&self) -> String {
        (1..=self.timeline.len())
            .filter_map(|number| {
                self.timeline
                    .chapter_text(number)
                    .ok()
                    .map(|text| format!("Chapter: {}\n{}", number, text))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn all_summaries(&self) -> String {
        self.timeline
            .chapters()
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(position, chapter)| format!("Chapter: {}\n{}", position + 1, chapter.summary))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// First message still sent to the model.
    fn first_included_message_id(&self) -> usize {
        let conversation = self.timeline.store().conversation();
        let conversation = conversation.read();
        conversation
            .first_visible_index()
            .unwrap_or(conversation.len())
    }
}
