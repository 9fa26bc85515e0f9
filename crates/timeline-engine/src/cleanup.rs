//! Transcript maintenance: reasoning blocks and tool-call records.

use timeline_core::host::ReasoningTemplate;
use timeline_llm::strip_reasoning_blocks;

use crate::error::TimelineError;
use crate::timeline::{Result, Timeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolCallCleanup {
    pub removed: usize,
    /// Tool-call records left in place because they end a chapter.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct TranscriptCleanup {
    timeline: Timeline,
}

impl TranscriptCleanup {
    pub fn new(timeline: Timeline) -> Self {
        Self { timeline }
    }

    /// Drops stored reasoning and, with a template, inline reasoning blocks
    /// from messages `start..=end`. Returns how many messages changed.
    pub async fn strip_reasoning(
        &self,
        start: usize,
        end: usize,
        template: Option<&ReasoningTemplate>,
    ) -> Result<usize> {
        let len = self.timeline.store().message_count();
        if end >= len {
            return Err(TimelineError::OutOfBounds { index: end, len });
        }
        if start > end {
            return Err(TimelineError::EmptyRange { start, end });
        }

        let changed = self.timeline.store().with_messages_mut(|messages| {
            let mut changed = 0;
            for message in &mut messages[start..=end] {
                let mut touched = message.extra.reasoning.take().is_some();
                if let Some(stripped) =
                    template.and_then(|template| strip_reasoning_blocks(&message.mes, template))
                {
                    message.mes = stripped;
                    touched = true;
                }
                if touched {
                    changed += 1;
                }
            }
            changed
        });

        if changed > 0 {
            self.timeline.store().save_conversation().await?;
        }
        log::info!(
            "[{}] stripped reasoning from {} messages ({}-{})",
            self.timeline.store().chat_id(),
            changed,
            start,
            end
        );
        Ok(changed)
    }

    /// Deletes every tool-call record that does not end a chapter and shifts
    /// chapter boundaries to match.
    pub async fn remove_tool_calls(&self) -> Result<ToolCallCleanup> {
        let (removable, skipped) = self.timeline.store().with_messages(|messages| {
            let mut removable = Vec::new();
            let mut skipped = 0;
            for (index, message) in messages.iter().enumerate() {
                if !message.has_tool_calls() {
                    continue;
                }
                if message.is_chapter_end() {
                    skipped += 1;
                } else {
                    removable.push(index);
                }
            }
            (removable, skipped)
        });

        if removable.is_empty() {
            return Ok(ToolCallCleanup {
                removed: 0,
                skipped,
            });
        }

        self.timeline.store().with_messages_mut(|messages| {
            for &index in removable.iter().rev() {
                messages.remove(index);
            }
        });
        self.timeline.reindex_after_removal(&removable)?;
        self.timeline.store().save_conversation().await?;

        log::info!(
            "[{}] removed {} tool-call messages ({} skipped)",
            self.timeline.store().chat_id(),
            removable.len(),
            skipped
        );
        Ok(ToolCallCleanup {
            removed: removable.len(),
            skipped,
        })
    }
}
