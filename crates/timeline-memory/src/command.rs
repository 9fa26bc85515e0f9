//! Slash command catalogue and argument parsing.
//!
//! Invocations look like `/name key=value "quoted text" words`. Named
//! arguments may be quoted; everything else is joined into the unnamed
//! argument.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use timeline_core::host::SlashCommandSpec;

use crate::error::{CommandError, Result};

pub const CHAPTER_END: &str = "chapter-end";
pub const SCENE_END: &str = "scene-end";
pub const QUERY: &str = "timeline-query";
pub const QUERY_RANGE: &str = "timeline-query-chapters";
pub const FILL: &str = "timeline-fill";
pub const FILL_RESULTS: &str = "timeline-fill-results";
pub const REMOVE_MARKER: &str = "remove-chapter-marker";
pub const REMOVE_CHAPTER: &str = "remove-chapter";
pub const MIGRATE: &str = "timeline-migrate";
pub const SUMMARY: &str = "chapter-summary";
pub const RESUMMARIZE: &str = "resummarize";
pub const ARC_ANALYZER: &str = "arc-analyzer";
pub const REMOVE_REASONING: &str = "remove-reasoning";
pub const REMOVE_TOOL_CALLS: &str = "remove-tool-calls";
pub const LORE_MANAGE: &str = "lore-manage";

/// Commands registered with the host.
pub fn catalogue() -> Vec<SlashCommandSpec> {
    vec![
        SlashCommandSpec {
            name: CHAPTER_END,
            aliases: vec![SCENE_END],
            help: "Seal a chapter ending at a message (default: the last one). Args: title=, profile=, [message id]",
        },
        SlashCommandSpec {
            name: QUERY,
            aliases: vec![],
            help: "Ask a question about one chapter. Args: chapter=, [question]",
        },
        SlashCommandSpec {
            name: QUERY_RANGE,
            aliases: vec![],
            help: "Ask a question about a range of chapters. Args: start=, end=, [question]",
        },
        SlashCommandSpec {
            name: FILL,
            aliases: vec![],
            help: "Gather timeline context for the next reply. Args: await=true to wait for the results",
        },
        SlashCommandSpec {
            name: FILL_RESULTS,
            aliases: vec![],
            help: "Print the results of the last timeline fill as JSON",
        },
        SlashCommandSpec {
            name: REMOVE_MARKER,
            aliases: vec![],
            help: "Remove the chapter that ends at a message. Args: [message id]",
        },
        SlashCommandSpec {
            name: REMOVE_CHAPTER,
            aliases: vec![],
            help: "Remove a chapter by number. Args: [chapter number]",
        },
        SlashCommandSpec {
            name: MIGRATE,
            aliases: vec![],
            help: "Convert legacy timeline data and repair chapter markers",
        },
        SlashCommandSpec {
            name: SUMMARY,
            aliases: vec![],
            help: "Print a chapter's summary. Args: [chapter number]",
        },
        SlashCommandSpec {
            name: RESUMMARIZE,
            aliases: vec![],
            help: "Summarize a chapter again in place. Args: profile=, [chapter number]",
        },
        SlashCommandSpec {
            name: ARC_ANALYZER,
            aliases: vec![],
            help: "Propose chapter breaks for the unsealed messages. Args: profile=, apply=true to seal them",
        },
        SlashCommandSpec {
            name: REMOVE_REASONING,
            aliases: vec![],
            help: "Remove reasoning blocks from messages. Args: [start-end] (default: all)",
        },
        SlashCommandSpec {
            name: REMOVE_TOOL_CALLS,
            aliases: vec![],
            help: "Delete tool call records from the transcript",
        },
        SlashCommandSpec {
            name: LORE_MANAGE,
            aliases: vec![],
            help: "Let the model update the character's lorebook. Args: await=true to wait for it",
        },
    ]
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineCommand {
    ChapterEnd {
        message_id: Option<usize>,
        title: Option<String>,
        profile: Option<String>,
    },
    Query {
        chapter: usize,
        query: String,
    },
    QueryRange {
        start: usize,
        end: usize,
        query: String,
    },
    Fill {
        wait: bool,
    },
    FillResults,
    RemoveMarker {
        message_id: usize,
    },
    RemoveChapter {
        number: usize,
    },
    Migrate,
    Summary {
        number: usize,
    },
    Resummarize {
        number: usize,
        profile: Option<String>,
    },
    ArcAnalyzer {
        profile: Option<String>,
        apply: bool,
    },
    RemoveReasoning {
        range: Option<(usize, usize)>,
    },
    RemoveToolCalls,
    ManageLore {
        wait: bool,
    },
}

impl TimelineCommand {
    /// Parses `line`, with or without the leading slash.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest),
            None => (line, ""),
        };
        let args = SlashArgs::parse(rest);

        let command = match name {
            CHAPTER_END | SCENE_END => TimelineCommand::ChapterEnd {
                message_id: args.unnamed_index(CHAPTER_END, "message id")?,
                title: args.named("title"),
                profile: args.named("profile"),
            },
            QUERY => TimelineCommand::Query {
                chapter: args.required_index(QUERY, "chapter")?,
                query: args.required_text(QUERY, "question")?,
            },
            QUERY_RANGE => TimelineCommand::QueryRange {
                start: args.required_index(QUERY_RANGE, "start")?,
                end: args.required_index(QUERY_RANGE, "end")?,
                query: args.required_text(QUERY_RANGE, "question")?,
            },
            FILL => TimelineCommand::Fill {
                wait: args.flag(FILL, "await")?,
            },
            FILL_RESULTS => TimelineCommand::FillResults,
            REMOVE_MARKER => TimelineCommand::RemoveMarker {
                message_id: args
                    .unnamed_index(REMOVE_MARKER, "message id")?
                    .ok_or(CommandError::MissingArgument {
                        command: REMOVE_MARKER,
                        argument: "message id",
                    })?,
            },
            REMOVE_CHAPTER => TimelineCommand::RemoveChapter {
                number: args.chapter_number(REMOVE_CHAPTER)?,
            },
            MIGRATE => TimelineCommand::Migrate,
            SUMMARY => TimelineCommand::Summary {
                number: args.chapter_number(SUMMARY)?,
            },
            RESUMMARIZE => TimelineCommand::Resummarize {
                number: args.chapter_number(RESUMMARIZE)?,
                profile: args.named("profile"),
            },
            ARC_ANALYZER => TimelineCommand::ArcAnalyzer {
                profile: args.named("profile"),
                apply: args.flag(ARC_ANALYZER, "apply")?,
            },
            REMOVE_REASONING => TimelineCommand::RemoveReasoning {
                range: args.range(REMOVE_REASONING)?,
            },
            REMOVE_TOOL_CALLS => TimelineCommand::RemoveToolCalls,
            LORE_MANAGE => TimelineCommand::ManageLore {
                wait: args.flag(LORE_MANAGE, "await")?,
            },
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn token_pattern() -> Option<&'static Regex> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(r#"(?:([A-Za-z][\w-]*)=)?(?:"([^"]*)"|'([^']*)'|(\S+))"#).ok())
        .as_ref()
}

/// Named and unnamed arguments of one invocation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SlashArgs {
    named: HashMap<String, String>,
    unnamed: Vec<String>,
}

impl SlashArgs {
    pub fn parse(input: &str) -> Self {
        let mut args = SlashArgs::default();
        let Some(pattern) = token_pattern() else {
            args.unnamed.extend(input.split_whitespace().map(str::to_string));
            return args;
        };
        for captures in pattern.captures_iter(input) {
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .or_else(|| captures.get(4))
                .map(|value| value.as_str().to_string())
                .unwrap_or_default();
            match captures.get(1) {
                Some(name) => {
                    args.named.insert(name.as_str().to_ascii_lowercase(), value);
                }
                None => args.unnamed.push(value),
            }
        }
        args
    }

    pub fn named(&self, name: &str) -> Option<String> {
        self.named
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Unnamed words joined by single spaces.
    pub fn unnamed(&self) -> String {
        self.unnamed.join(" ")
    }

    fn flag(&self, command: &'static str, name: &'static str) -> Result<bool> {
        match self.named(name) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(CommandError::InvalidArgument {
                    command,
                    argument: name,
                    value,
                }),
            },
        }
    }

    fn required_index(&self, command: &'static str, name: &'static str) -> Result<usize> {
        let value = self.named(name).ok_or(CommandError::MissingArgument {
            command,
            argument: name,
        })?;
        parse_index(command, name, &value)
    }

    fn required_text(&self, command: &'static str, name: &'static str) -> Result<String> {
        let text = self.unnamed();
        if text.trim().is_empty() {
            return Err(CommandError::MissingArgument {
                command,
                argument: name,
            });
        }
        Ok(text)
    }

    fn unnamed_index(&self, command: &'static str, name: &'static str) -> Result<Option<usize>> {
        let text = self.unnamed();
        if text.trim().is_empty() {
            return Ok(None);
        }
        parse_index(command, name, &text).map(Some)
    }

    fn chapter_number(&self, command: &'static str) -> Result<usize> {
        self.unnamed_index(command, "chapter number")?
            .ok_or(CommandError::MissingArgument {
                command,
                argument: "chapter number",
            })
    }

    /// `A-B` or a single index `A`.
    fn range(&self, command: &'static str) -> Result<Option<(usize, usize)>> {
        let text = self.unnamed();
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let (start, end) = match text.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (text, text),
        };
        let start = parse_index(command, "range", start)?;
        let end = parse_index(command, "range", end)?;
        Ok(Some((start, end)))
    }
}

fn parse_index(command: &'static str, argument: &'static str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidArgument {
            command,
            argument,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_values_may_be_quoted() {
        let args = SlashArgs::parse(r#"title="The Long Road" profile='Fast one' 41"#);
        assert_eq!(args.named("title").as_deref(), Some("The Long Road"));
        assert_eq!(args.named("profile").as_deref(), Some("Fast one"));
        assert_eq!(args.unnamed(), "41");
    }

    #[test]
    fn chapter_end_defaults_to_the_last_message() {
        assert_eq!(
            TimelineCommand::parse("/chapter-end").unwrap(),
            TimelineCommand::ChapterEnd {
                message_id: None,
                title: None,
                profile: None,
            }
        );
        assert_eq!(
            TimelineCommand::parse("/scene-end title=Arrival 12").unwrap(),
            TimelineCommand::ChapterEnd {
                message_id: Some(12),
                title: Some("Arrival".to_string()),
                profile: None,
            }
        );
    }

    #[test]
    fn queries_need_a_chapter_and_a_question() {
        assert_eq!(
            TimelineCommand::parse("/timeline-query chapter=2 Who owns the ship?").unwrap(),
            TimelineCommand::Query {
                chapter: 2,
                query: "Who owns the ship?".to_string(),
            }
        );
        assert!(matches!(
            TimelineCommand::parse("/timeline-query Who?"),
            Err(CommandError::MissingArgument { argument: "chapter", .. })
        ));
        assert!(matches!(
            TimelineCommand::parse("/timeline-query-chapters start=1 end=3"),
            Err(CommandError::MissingArgument { argument: "question", .. })
        ));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(
            TimelineCommand::parse("timeline-fill await=TRUE").unwrap(),
            TimelineCommand::Fill { wait: true }
        );
        assert!(matches!(
            TimelineCommand::parse("/timeline-fill await=soon"),
            Err(CommandError::InvalidArgument { argument: "await", .. })
        ));
    }

    #[test]
    fn reasoning_range_forms() {
        assert_eq!(
            TimelineCommand::parse("/remove-reasoning 3-7").unwrap(),
            TimelineCommand::RemoveReasoning { range: Some((3, 7)) }
        );
        assert_eq!(
            TimelineCommand::parse("/remove-reasoning 4").unwrap(),
            TimelineCommand::RemoveReasoning { range: Some((4, 4)) }
        );
        assert_eq!(
            TimelineCommand::parse("/remove-reasoning").unwrap(),
            TimelineCommand::RemoveReasoning { range: None }
        );
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(matches!(
            TimelineCommand::parse("/summon-dragon"),
            Err(CommandError::Unknown(name)) if name == "summon-dragon"
        ));
    }

    #[test]
    fn catalogue_covers_every_parsed_name() {
        let catalogue = catalogue();
        for spec in &catalogue {
            let line = match spec.name {
                QUERY => "timeline-query chapter=1 q".to_string(),
                QUERY_RANGE => "timeline-query-chapters start=1 end=2 q".to_string(),
                REMOVE_MARKER | REMOVE_CHAPTER | SUMMARY | RESUMMARIZE => {
                    format!("{} 1", spec.name)
                }
                name => name.to_string(),
            };
            assert!(TimelineCommand::parse(&line).is_ok(), "{}", spec.name);
        }
        assert_eq!(catalogue.len(), 14);
    }
}
