use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A sealed, summarized segment of the transcript.
///
/// `start_msg_id` of chapter *k* equals `end_msg_id` of chapter *k-1* (or 0
/// for the first chapter). The boundary message belongs to the earlier
/// chapter, so only the first chapter includes its `start_msg_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub summary: String,
    pub start_msg_id: usize,
    pub end_msg_id: usize,
}

impl Chapter {
    pub fn new(summary: impl Into<String>, start_msg_id: usize, end_msg_id: usize) -> Self {
        Self {
            summary: summary.into(),
            start_msg_id,
            end_msg_id,
        }
    }

    /// First transcript index that belongs to this chapter when it sits at
    /// `position` (0-based) in the timeline.
    pub fn first_message_index(&self, position: usize) -> usize {
        if position == 0 {
            self.start_msg_id
        } else {
            self.start_msg_id + 1
        }
    }

    /// Inclusive transcript range covered by this chapter at `position`.
    pub fn message_range(&self, position: usize) -> RangeInclusive<usize> {
        self.first_message_index(position)..=self.end_msg_id
    }
}

/// Projection of a chapter used by the `timeline` macro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub chapter_id: usize,
    pub message_range: MessageRange,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRange {
    pub start: usize,
    pub end: usize,
}

impl TimelineEntry {
    pub fn from_chapter(position: usize, chapter: &Chapter) -> Self {
        Self {
            chapter_id: position + 1,
            message_range: MessageRange {
                start: chapter.start_msg_id,
                end: chapter.end_msg_id,
            },
            summary: chapter.summary.clone(),
        }
    }
}
