//! The chapter list of one conversation.
//!
//! Every mutation keeps three invariants: chapters are ordered by strictly
//! increasing `end_msg_id`, each chapter starts where the previous one ended,
//! and a message carries `extra.rmr_chapter` exactly when it ends a chapter.

mod migrate;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use timeline_core::host::HostCommand;
use timeline_core::model::TimelineEntry;
use timeline_core::{Chapter, Host, SharedSettings, Store};

pub use migrate::MigrationReport;

use crate::error::TimelineError;

pub type Result<T> = std::result::Result<T, TimelineError>;

/// One message of a chapter, transformed for prompt use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub index: usize,
    pub name: String,
    pub text: String,
    pub is_user: bool,
}

impl fmt::Display for HistoryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    OutOfOrder { chapter: usize },
    Discontiguous { chapter: usize, expected_start: usize },
    EndOutOfBounds { chapter: usize, end_msg_id: usize },
    MissingMarker(usize),
    StrayMarker(usize),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OutOfOrder { chapter } => {
                write!(f, "chapter {} does not end after the previous chapter", chapter)
            }
            Violation::Discontiguous {
                chapter,
                expected_start,
            } => write!(f, "chapter {} should start at message {}", chapter, expected_start),
            Violation::EndOutOfBounds { chapter, end_msg_id } => write!(
                f,
                "chapter {} ends at message {} which does not exist",
                chapter, end_msg_id
            ),
            Violation::MissingMarker(index) => {
                write!(f, "message {} ends a chapter but is not marked", index)
            }
            Violation::StrayMarker(index) => {
                write!(f, "message {} is marked but ends no chapter", index)
            }
        }
    }
}

#[derive(Clone)]
pub struct Timeline {
    host: Host,
    store: Store,
    settings: SharedSettings,
    current_chat: Arc<RwLock<Option<String>>>,
}

impl Timeline {
    pub fn new(host: Host, settings: SharedSettings) -> Self {
        let store = Store::new(host.chat.clone());
        Self {
            host,
            store,
            settings,
            current_chat: Arc::new(RwLock::new(None)),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn chapters(&self) -> Result<Vec<Chapter>> {
        Ok(self.store.load_timeline()?)
    }

    pub fn len(&self) -> usize {
        self.chapters().map(|chapters| chapters.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chapter by 1-based number.
    pub fn chapter(&self, number: usize) -> Result<Chapter> {
        let chapters = self.chapters()?;
        number
            .checked_sub(1)
            .and_then(|position| chapters.get(position).cloned())
            .ok_or(TimelineError::ChapterNotFound(number))
    }

    /// First message index of the next chapter to be sealed.
    pub fn next_start(&self) -> Result<usize> {
        Ok(self
            .chapters()?
            .last()
            .map(|chapter| chapter.end_msg_id)
            .unwrap_or(0))
    }

    /// First message index the next chapter will contain.
    pub fn next_first_message(&self) -> Result<usize> {
        let chapters = self.chapters()?;
        Ok(match chapters.last() {
            Some(last) => last.end_msg_id + 1,
            None => 0,
        })
    }

    /// Appends a sealed chapter. Marks its end message and, under the
    /// hide-chapter policy, hides its range.
    pub async fn add_chapter(
        &self,
        summary: impl Into<String>,
        start_msg_id: usize,
        end_msg_id: usize,
    ) -> Result<Chapter> {
        let mut chapters = self.chapters()?;
        let len = self.store.message_count();
        if end_msg_id >= len {
            return Err(TimelineError::OutOfBounds {
                index: end_msg_id,
                len,
            });
        }

        let expected = chapters.last().map(|last| last.end_msg_id).unwrap_or(0);
        if let Some(last) = chapters.last() {
            if end_msg_id <= last.end_msg_id {
                return Err(TimelineError::OutOfOrder {
                    end_msg_id,
                    last_end: last.end_msg_id,
                });
            }
        }
        if start_msg_id != expected {
            return Err(TimelineError::Discontiguous {
                start_msg_id,
                expected,
            });
        }

        let chapter = Chapter::new(summary, start_msg_id, end_msg_id);
        let position = chapters.len();
        chapters.push(chapter.clone());
        self.store.save_timeline(&chapters)?;
        self.set_marker(end_msg_id, true);

        if let Err(err) = self.persist_sealed(&chapter, position).await {
            chapters.pop();
            self.set_marker(end_msg_id, false);
            if let Err(rollback) = self.store.save_timeline(&chapters) {
                log::warn!("[{}] timeline rollback failed: {}", self.store.chat_id(), rollback);
            }
            return Err(err);
        }

        log::info!(
            "[{}] sealed chapter {} (messages {}-{})",
            self.store.chat_id(),
            position + 1,
            start_msg_id,
            end_msg_id
        );
        Ok(chapter)
    }

    async fn persist_sealed(&self, chapter: &Chapter, position: usize) -> Result<()> {
        self.store.save_conversation().await?;
        if self.settings.read().hide_chapters {
            let range = chapter.message_range(position);
            self.host
                .run(HostCommand::Hide {
                    start: *range.start(),
                    end: *range.end(),
                })
                .await?;
        }
        Ok(())
    }

    /// Removes the chapter ending at `end_msg_id`. A later chapter absorbs the
    /// removed range so the timeline stays contiguous.
    pub async fn remove_chapter(&self, end_msg_id: usize) -> Result<Option<Chapter>> {
        let mut chapters = self.chapters()?;
        let Some(position) = chapters
            .iter()
            .position(|chapter| chapter.end_msg_id == end_msg_id)
        else {
            return Ok(None);
        };

        let removed = chapters.remove(position);
        if let Some(next) = chapters.get_mut(position) {
            next.start_msg_id = removed.start_msg_id;
        }
        self.store.save_timeline(&chapters)?;
        self.set_marker(end_msg_id, false);
        self.store.save_conversation().await?;

        // Only unhides when the policy is on now; a range sealed under a
        // different policy setting stays as it is.
        if self.settings.read().hide_chapters {
            let range = removed.message_range(position);
            let last = self.store.message_count().saturating_sub(1);
            let end = (*range.end()).min(last);
            if *range.start() <= end {
                self.host
                    .run(HostCommand::Unhide {
                        start: *range.start(),
                        end,
                    })
                    .await?;
            }
        }

        log::info!(
            "[{}] removed chapter {} (messages {}-{})",
            self.store.chat_id(),
            position + 1,
            removed.start_msg_id,
            removed.end_msg_id
        );
        Ok(Some(removed))
    }

    /// Removes a chapter by 1-based number.
    pub async fn remove_chapter_number(&self, number: usize) -> Result<Chapter> {
        let chapter = self.chapter(number)?;
        self.remove_chapter(chapter.end_msg_id)
            .await?
            .ok_or(TimelineError::ChapterNotFound(number))
    }

    /// Clears the chapter marker at `message_id`, removing the chapter that
    /// ends there. A stray marker is simply cleared.
    pub async fn remove_marker(&self, message_id: usize) -> Result<Option<Chapter>> {
        if let Some(chapter) = self.remove_chapter(message_id).await? {
            return Ok(Some(chapter));
        }

        let cleared = self.set_marker(message_id, false);
        if !cleared {
            return Err(TimelineError::NoChapterAt(message_id));
        }
        self.store.save_conversation().await?;
        Ok(None)
    }

    pub fn replace_summary(&self, number: usize, summary: impl Into<String>) -> Result<Chapter> {
        let mut chapters = self.chapters()?;
        let chapter = number
            .checked_sub(1)
            .and_then(|position| chapters.get_mut(position))
            .ok_or(TimelineError::ChapterNotFound(number))?;
        chapter.summary = summary.into();
        let updated = chapter.clone();
        self.store.save_timeline(&chapters)?;
        Ok(updated)
    }

    pub fn chapter_summary(&self, number: usize) -> Result<String> {
        Ok(self.chapter(number)?.summary)
    }

    /// The chapter's messages, boundary of the previous chapter excluded,
    /// transformed for prompt use. Tool-call records are skipped.
    pub fn chapter_history(&self, number: usize) -> Result<Vec<HistoryLine>> {
        let chapter = self.chapter(number)?;
        let range = chapter.message_range(number - 1);
        Ok(self.history_lines(*range.start(), *range.end(), true))
    }

    pub fn chapter_text(&self, number: usize) -> Result<String> {
        Ok(join_lines(&self.chapter_history(number)?))
    }

    /// Messages `start..=end` as prompt lines. Hidden messages are dropped
    /// unless `include_hidden`.
    pub fn history_lines(&self, start: usize, end: usize, include_hidden: bool) -> Vec<HistoryLine> {
        let formatter = self.host.formatter.clone();
        self.store.with_messages(|messages| {
            messages
                .iter()
                .enumerate()
                .take(end.saturating_add(1))
                .skip(start)
                .filter(|(_, message)| include_hidden || !message.is_hidden())
                .filter(|(_, message)| !message.has_tool_calls() && !message.mes.trim().is_empty())
                .map(|(index, message)| HistoryLine {
                    index,
                    name: message.name.clone(),
                    text: formatter.transform_message(&message.mes, message.is_user),
                    is_user: message.is_user,
                })
                .collect()
        })
    }

    pub fn entries(&self) -> Result<Vec<TimelineEntry>> {
        Ok(self
            .chapters()?
            .iter()
            .enumerate()
            .map(|(position, chapter)| TimelineEntry::from_chapter(position, chapter))
            .collect())
    }

    /// The `timeline` projection as JSON text.
    pub fn timeline_json(&self) -> String {
        let entries = self.entries().unwrap_or_default();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn set_current_chat_content(&self, content: Option<String>) {
        *self.current_chat.write() = content;
    }

    pub fn current_chat_content(&self) -> Option<String> {
        self.current_chat.read().clone()
    }

    /// Reports invariant violations without repairing them.
    pub fn validate(&self) -> Result<Vec<Violation>> {
        let chapters = self.chapters()?;
        let mut violations = Vec::new();
        let len = self.store.message_count();

        for (position, chapter) in chapters.iter().enumerate() {
            let number = position + 1;
            let expected_start = position
                .checked_sub(1)
                .map(|previous| chapters[previous].end_msg_id)
                .unwrap_or(0);
            if position > 0 && chapter.end_msg_id <= chapters[position - 1].end_msg_id {
                violations.push(Violation::OutOfOrder { chapter: number });
            }
            if chapter.start_msg_id != expected_start {
                violations.push(Violation::Discontiguous {
                    chapter: number,
                    expected_start,
                });
            }
            if chapter.end_msg_id >= len {
                violations.push(Violation::EndOutOfBounds {
                    chapter: number,
                    end_msg_id: chapter.end_msg_id,
                });
            }
        }

        let ends: BTreeSet<usize> = chapters.iter().map(|chapter| chapter.end_msg_id).collect();
        self.store.with_messages(|messages| {
            for (index, message) in messages.iter().enumerate() {
                match (message.is_chapter_end(), ends.contains(&index)) {
                    (false, true) => violations.push(Violation::MissingMarker(index)),
                    (true, false) => violations.push(Violation::StrayMarker(index)),
                    _ => {}
                }
            }
        });

        Ok(violations)
    }

    /// Re-indexes chapters after the messages at `removed` were deleted.
    /// Removed indices must not be chapter ends.
    pub fn reindex_after_removal(&self, removed: &[usize]) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        let mut sorted = removed.to_vec();
        sorted.sort_unstable();
        let shift = |index: usize| index - sorted.partition_point(|&gone| gone < index);

        let mut chapters = self.chapters()?;
        if chapters.is_empty() {
            return Ok(());
        }
        for chapter in &mut chapters {
            chapter.start_msg_id = shift(chapter.start_msg_id);
            chapter.end_msg_id = shift(chapter.end_msg_id);
        }
        self.store.save_timeline(&chapters)?;
        Ok(())
    }

    /// Sets or clears the marker bit. Returns whether it changed.
    fn set_marker(&self, index: usize, value: bool) -> bool {
        self.store.with_messages_mut(|messages| match messages.get_mut(index) {
            Some(message) if message.extra.rmr_chapter != value => {
                message.extra.rmr_chapter = value;
                true
            }
            _ => false,
        })
    }
}

pub fn join_lines(lines: &[HistoryLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use timeline_core::host::memory::InMemoryHost;
    use timeline_core::{ChatHost, ChatMessage, Conversation, Settings};

    use super::*;

    pub(crate) fn conversation(len: usize) -> Conversation {
        let mut conversation = Conversation::new("chat-1");
        conversation.user_name = "Mara".to_string();
        for i in 0..len {
            let message = if i % 2 == 0 {
                ChatMessage::user("Mara", format!("line {}", i))
            } else {
                ChatMessage::character("Vex", format!("line {}", i))
            };
            conversation.messages.push(message);
        }
        conversation
    }

    pub(crate) fn timeline_with(len: usize, hide: bool) -> (Arc<InMemoryHost>, Timeline) {
        let host = Arc::new(InMemoryHost::new(conversation(len)));
        let settings = Settings {
            hide_chapters: hide,
            ..Default::default()
        }
        .into_shared();
        let timeline = Timeline::new(host.host(), settings);
        (host, timeline)
    }

    #[tokio::test]
    async fn failed_save_rolls_the_chapter_back() {
        let (host, timeline) = timeline_with(8, true);
        timeline.add_chapter("first", 0, 3).await.unwrap();
        host.fail_saves(1);

        assert!(timeline.add_chapter("second", 3, 6).await.is_err());

        assert_eq!(timeline.chapters().unwrap(), vec![Chapter::new("first", 0, 3)]);
        let messages = host.messages();
        assert!(!messages[6].is_chapter_end());
        assert!(!messages[5].is_system);
        assert!(timeline.validate().unwrap().is_empty());

        timeline.add_chapter("second", 3, 6).await.unwrap();
        assert_eq!(timeline.len(), 2);
    }

    #[tokio::test]
    async fn add_chapter_marks_and_hides() {
        let (host, timeline) = timeline_with(8, true);

        timeline.add_chapter("first", 0, 3).await.unwrap();
        timeline.add_chapter("second", 3, 6).await.unwrap();

        let messages = host.messages();
        let marked: Vec<usize> = (0..8).filter(|&i| messages[i].is_chapter_end()).collect();
        assert_eq!(marked, vec![3, 6]);
        assert!(messages[..=6].iter().all(|m| m.is_system));
        assert!(!messages[7].is_system);
        assert!(timeline.validate().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_chapter_rejects_order_and_gaps() {
        let (_, timeline) = timeline_with(8, false);
        timeline.add_chapter("first", 0, 3).await.unwrap();

        assert!(matches!(
            timeline.add_chapter("x", 3, 3).await,
            Err(TimelineError::OutOfOrder { .. })
        ));
        assert!(matches!(
            timeline.add_chapter("x", 4, 6).await,
            Err(TimelineError::Discontiguous { expected: 3, .. })
        ));
        assert!(matches!(
            timeline.add_chapter("x", 3, 8).await,
            Err(TimelineError::OutOfBounds { index: 8, len: 8 })
        ));
        assert_eq!(timeline.len(), 1);
    }

    #[tokio::test]
    async fn remove_restores_hidden_range() {
        let (host, timeline) = timeline_with(8, true);
        timeline.add_chapter("first", 0, 3).await.unwrap();
        timeline.add_chapter("second", 3, 6).await.unwrap();

        let removed = timeline.remove_chapter(6).await.unwrap().unwrap();

        assert_eq!(removed.summary, "second");
        let messages = host.messages();
        assert!(messages[..=3].iter().all(|m| m.is_system));
        assert!(messages[4..].iter().all(|m| !m.is_system));
        assert!(!messages[6].is_chapter_end());
        assert!(timeline.validate().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_a_middle_chapter_keeps_contiguity() {
        let (_, timeline) = timeline_with(10, false);
        timeline.add_chapter("a", 0, 2).await.unwrap();
        timeline.add_chapter("b", 2, 5).await.unwrap();
        timeline.add_chapter("c", 5, 9).await.unwrap();

        timeline.remove_chapter_number(2).await.unwrap();

        let chapters = timeline.chapters().unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1], Chapter::new("c", 2, 9));
        assert!(timeline.validate().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_missing_chapter_is_none() {
        let (_, timeline) = timeline_with(4, true);
        assert!(timeline.remove_chapter(2).await.unwrap().is_none());
        assert!(matches!(
            timeline.remove_chapter_number(1).await,
            Err(TimelineError::ChapterNotFound(1))
        ));
    }

    #[tokio::test]
    async fn remove_marker_clears_stray_bits() {
        let (host, timeline) = timeline_with(4, false);
        host.conversation().write().messages[2].extra.rmr_chapter = true;

        assert!(timeline.remove_marker(2).await.unwrap().is_none());
        assert!(!host.messages()[2].is_chapter_end());
        assert!(matches!(
            timeline.remove_marker(2).await,
            Err(TimelineError::NoChapterAt(2))
        ));
    }

    #[tokio::test]
    async fn history_skips_previous_boundary() {
        let (_, timeline) = timeline_with(8, true);
        timeline.add_chapter("first", 0, 3).await.unwrap();
        timeline.add_chapter("second", 3, 6).await.unwrap();

        let history = timeline.chapter_history(2).unwrap();
        let indices: Vec<usize> = history.iter().map(|line| line.index).collect();
        assert_eq!(indices, vec![4, 5, 6]);
        assert_eq!(history[0].to_string(), "Mara: line 4");
        assert_eq!(timeline.chapter_summary(1).unwrap(), "first");
        assert!(matches!(
            timeline.chapter_history(3),
            Err(TimelineError::ChapterNotFound(3))
        ));
    }

    #[tokio::test]
    async fn entries_project_one_based_ids() {
        let (_, timeline) = timeline_with(5, false);
        timeline.add_chapter("first", 0, 3).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&timeline.timeline_json()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "chapter_id": 1,
                "message_range": {"start": 0, "end": 3},
                "summary": "first"
            }])
        );
    }

    #[tokio::test]
    async fn reindex_shifts_later_chapters() {
        let (_, timeline) = timeline_with(10, false);
        timeline.add_chapter("a", 0, 3).await.unwrap();
        timeline.add_chapter("b", 3, 8).await.unwrap();

        timeline.reindex_after_removal(&[5, 1]).unwrap();

        let chapters = timeline.chapters().unwrap();
        assert_eq!(chapters[0], Chapter::new("a", 0, 2));
        assert_eq!(chapters[1], Chapter::new("b", 2, 6));
    }
}
