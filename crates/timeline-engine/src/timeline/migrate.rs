use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use timeline_core::store::TIMELINE_KEY;
use timeline_core::Chapter;

use super::{Result, Timeline};

/// What a migration pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Chapters parsed out of a text-format timeline.
    pub chapters_converted: usize,
    /// `rmr_scene` markers rewritten as `rmr_chapter`.
    pub scene_markers: usize,
    /// Per-chapter `timestamp` fields dropped.
    pub timestamps_dropped: usize,
    /// Marker bits set or cleared to match chapter ends.
    pub markers_repaired: usize,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self != &MigrationReport::default()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.changed() {
            return f.write_str("Nothing to migrate");
        }
        write!(
            f,
            "Migrated {} legacy chapters, {} scene markers, {} timestamps; repaired {} chapter markers",
            self.chapters_converted, self.scene_markers, self.timestamps_dropped, self.markers_repaired
        )
    }
}

fn legacy_header() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| {
            Regex::new(r"^(?:Scene|Chapter)\s+(\d+)\s*\(Messages?\s+(\d+)\s*-\s*(\d+)\):\s*(.*)$").ok()
        })
        .as_ref()
}

/// Parses `Chapter N (Messages A-B): summary` lines. Lines without a header
/// continue the previous summary.
pub(crate) fn parse_legacy_timeline(text: &str) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = Vec::new();
    let Some(header) = legacy_header() else {
        return chapters;
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match header.captures(trimmed) {
            Some(captures) => {
                let start = captures[2].parse().unwrap_or(0);
                let end = captures[3].parse().unwrap_or(start);
                chapters.push(Chapter::new(captures[4].trim(), start, end));
            }
            None => {
                if let Some(last) = chapters.last_mut() {
                    if !last.summary.is_empty() {
                        last.summary.push('\n');
                    }
                    last.summary.push_str(trimmed);
                }
            }
        }
    }

    chapters.sort_by_key(|chapter| chapter.end_msg_id);
    chapters.dedup_by_key(|chapter| chapter.end_msg_id);

    // Legacy ranges were often disjoint (`0-3`, `4-7`); chapters here share
    // their boundary message with the previous chapter's end.
    let mut previous_end = 0;
    for chapter in chapters.iter_mut() {
        chapter.start_msg_id = previous_end;
        previous_end = chapter.end_msg_id;
    }
    chapters
}

impl Timeline {
    /// Converts legacy data in place. Running it twice changes nothing the
    /// second time.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        match self.store.raw_timeline() {
            Some(Value::String(text)) => {
                let chapters = parse_legacy_timeline(&text);
                report.chapters_converted = chapters.len();
                self.store.save_timeline(&chapters)?;
            }
            Some(Value::Array(mut entries)) => {
                for entry in entries.iter_mut() {
                    if let Some(object) = entry.as_object_mut() {
                        if object.remove("timestamp").is_some() {
                            report.timestamps_dropped += 1;
                        }
                    }
                }
                if report.timestamps_dropped > 0 {
                    self.store.put_raw(TIMELINE_KEY, Value::Array(entries));
                }
            }
            _ => {}
        }

        let chapters = self.chapters()?;
        let ends: BTreeSet<usize> = chapters.iter().map(|chapter| chapter.end_msg_id).collect();

        self.store.with_messages_mut(|messages| {
            for message in messages.iter_mut() {
                if message.extra.rmr_scene.take() == Some(true) {
                    report.scene_markers += 1;
                    message.extra.rmr_chapter = true;
                }
            }
            for (index, message) in messages.iter_mut().enumerate() {
                let should_mark = ends.contains(&index);
                if message.extra.rmr_chapter != should_mark {
                    message.extra.rmr_chapter = should_mark;
                    report.markers_repaired += 1;
                }
            }
        });

        if report.changed() {
            log::info!("[{}] {}", self.store.chat_id(), report);
            self.host.chat.save_metadata_debounced();
        }
        Ok(report)
    }

    /// Persists the transcript after a migration that touched messages.
    pub async fn migrate_and_save(&self) -> Result<MigrationReport> {
        let report = self.migrate()?;
        if report.scene_markers > 0 || report.markers_repaired > 0 {
            self.store.save_conversation().await?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use timeline_core::ChatHost;

    use super::*;
    use crate::timeline::tests::timeline_with;

    #[test]
    fn parses_legacy_text() {
        let chapters = parse_legacy_timeline(
            "Scene 1 (Messages 0-3): They met.\nChapter 2 (Message 3 - 7): They argued.\nand made up.",
        );
        assert_eq!(
            chapters,
            vec![
                Chapter::new("They met.", 0, 3),
                Chapter::new("They argued.\nand made up.", 3, 7),
            ]
        );
    }

    #[test]
    fn disjoint_legacy_ranges_become_contiguous() {
        let (host, timeline) = timeline_with(8, false);
        host.conversation().write().metadata.insert(
            TIMELINE_KEY.to_string(),
            json!("Chapter 1 (Messages 0-3): a\nChapter 2 (Messages 4-7): b"),
        );

        timeline.migrate().unwrap();

        let chapters = timeline.chapters().unwrap();
        assert_eq!(
            chapters,
            vec![Chapter::new("a", 0, 3), Chapter::new("b", 3, 7)]
        );
        assert_eq!(chapters[1].message_range(1), 4..=7);
        assert!(timeline.validate().unwrap().is_empty());
    }

    #[test]
    fn migrates_text_timeline_and_scene_markers() {
        let (host, timeline) = timeline_with(8, false);
        {
            let conversation = host.conversation();
            let mut conversation = conversation.write();
            conversation.metadata.insert(
                TIMELINE_KEY.to_string(),
                json!("Chapter 1 (Messages 0-3): They met."),
            );
            conversation.messages[3].extra.rmr_scene = Some(true);
            conversation.messages[5].extra.rmr_chapter = true;
        }

        let report = timeline.migrate().unwrap();

        assert_eq!(report.chapters_converted, 1);
        assert_eq!(report.scene_markers, 1);
        assert_eq!(report.markers_repaired, 1);
        let messages = host.messages();
        assert!(messages[3].is_chapter_end());
        assert_eq!(messages[3].extra.rmr_scene, None);
        assert!(!messages[5].is_chapter_end());
        assert_eq!(timeline.chapters().unwrap(), vec![Chapter::new("They met.", 0, 3)]);
    }

    #[test]
    fn drops_timestamps() {
        let (host, timeline) = timeline_with(5, false);
        {
            let conversation = host.conversation();
            let mut conversation = conversation.write();
            conversation.metadata.insert(
                TIMELINE_KEY.to_string(),
                json!([{"summary": "s", "startMsgId": 0, "endMsgId": 3, "timestamp": 1700000000}]),
            );
            conversation.messages[3].extra.rmr_chapter = true;
        }

        let report = timeline.migrate().unwrap();

        assert_eq!(report.timestamps_dropped, 1);
        assert_eq!(report.markers_repaired, 0);
        assert!(host.metadata(TIMELINE_KEY).unwrap()[0].get("timestamp").is_none());
    }

    #[test]
    fn migrate_is_idempotent() {
        let (host, timeline) = timeline_with(8, false);
        {
            let conversation = host.conversation();
            let mut conversation = conversation.write();
            conversation.metadata.insert(
                TIMELINE_KEY.to_string(),
                json!("Scene 1 (Messages 0-2): a\nScene 2 (Messages 2-6): b"),
            );
            conversation.messages[1].extra.rmr_scene = Some(true);
        }

        assert!(timeline.migrate().unwrap().changed());
        let after_first = (host.messages(), host.metadata(TIMELINE_KEY));

        let second = timeline.migrate().unwrap();

        assert!(!second.changed());
        assert_eq!((host.messages(), host.metadata(TIMELINE_KEY)), after_first);
        assert!(timeline.validate().unwrap().is_empty());
    }
}
