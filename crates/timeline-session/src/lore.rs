//! Lore management: a session model curates the character's world-info book.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use timeline_core::host::{WorldInfoBook, WorldInfoEntry};
use timeline_core::tools::{FunctionTool, Tool, ToolError, ToolResult};
use timeline_engine::TimelineEngine;

use crate::args::{flexible_keys, flexible_u64, normalize_newlines, parse_args};
use crate::error::{Result, SessionError};
use crate::runtime::{SessionProgram, SessionRuntime};
use crate::world::BoundWorld;

pub const LIST_ENTRIES: &str = "list_entries";
pub const EDIT_ENTRY: &str = "edit_entry";
pub const END_LORE: &str = "end_lore_management";

/// Fields an edit may set. Absent fields are left unchanged on update.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntryFields {
    #[serde(default, deserialize_with = "flexible_keys")]
    pub key: Option<Vec<String>>,
    #[serde(default, deserialize_with = "flexible_keys")]
    pub keysecondary: Option<Vec<String>>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub constant: Option<bool>,
    #[serde(default)]
    pub selective: Option<bool>,
}

impl EntryFields {
    fn apply(self, entry: &mut WorldInfoEntry) {
        if let Some(key) = self.key {
            entry.key = key;
        }
        if let Some(keysecondary) = self.keysecondary {
            entry.keysecondary = keysecondary;
        }
        if let Some(content) = self.content {
            entry.content = normalize_newlines(&content);
        }
        if let Some(comment) = self.comment {
            entry.comment = normalize_newlines(&comment);
        }
        if let Some(constant) = self.constant {
            entry.constant = constant;
        }
        if let Some(selective) = self.selective {
            entry.selective = selective;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntryUpdate {
    #[serde(deserialize_with = "flexible_u64")]
    pub uid: u64,
    #[serde(flatten)]
    pub fields: EntryFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntryTarget {
    #[serde(deserialize_with = "flexible_u64")]
    pub uid: u64,
}

/// The `edit_entry` payload. A `uid` on `create` is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum EntryEdit {
    Create(EntryFields),
    Update(EntryUpdate),
    Delete(EntryTarget),
}

impl EntryEdit {
    /// Applies the edit to `book` and describes the result.
    pub fn apply(self, book: &mut WorldInfoBook) -> std::result::Result<String, String> {
        match self {
            EntryEdit::Create(fields) => {
                let mut entry = WorldInfoEntry {
                    uid: book.next_uid(),
                    ..Default::default()
                };
                fields.apply(&mut entry);
                let uid = entry.uid;
                book.insert(entry);
                Ok(format!("Created entry {}", uid))
            }
            EntryEdit::Update(EntryUpdate { uid, fields }) => {
                let entry = book
                    .get_mut(uid)
                    .ok_or_else(|| format!("Entry {} not found", uid))?;
                fields.apply(entry);
                Ok(format!("Updated entry {}", uid))
            }
            EntryEdit::Delete(EntryTarget { uid }) => book
                .remove(uid)
                .map(|_| format!("Deleted entry {}", uid))
                .ok_or_else(|| format!("Entry {} not found", uid)),
        }
    }
}

#[derive(Clone)]
pub struct LoreManager {
    engine: TimelineEngine,
}

impl LoreManager {
    pub fn new(engine: TimelineEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SessionProgram for LoreManager {
    fn profile(&self) -> Option<String> {
        let settings = self.engine.timeline().settings().read();
        settings.lore.profile.clone().or_else(|| settings.profile.clone())
    }

    async fn prepare(&self) -> Result<()> {
        let world = BoundWorld::resolve(self.engine.timeline().host()).ok_or(SessionError::NoWorld)?;
        // Fails early when the bound book does not exist.
        world.load().await?;
        Ok(())
    }

    fn seed_prompt(&self) -> String {
        let template = self.engine.timeline().settings().read().lore.seed_prompt.clone();
        self.engine.macros().expand(&template)
    }

    fn tools(&self, session: &SessionRuntime) -> Vec<FunctionTool> {
        vec![
            FunctionTool::new(Arc::new(ListEntriesTool {
                session: session.clone(),
            })),
            FunctionTool::new(Arc::new(EditEntryTool {
                session: session.clone(),
            }))
            .with_format_message("Updating the lorebook"),
            FunctionTool::new(Arc::new(EndLoreTool {
                session: session.clone(),
            }))
            .stealth(),
        ]
    }
}

fn no_world() -> ToolResult {
    ToolResult::failed("No lorebook is bound to the current character")
}

struct ListEntriesTool {
    session: SessionRuntime,
}

#[async_trait]
impl Tool for ListEntriesTool {
    fn name(&self) -> &str {
        LIST_ENTRIES
    }

    fn description(&self) -> &str {
        "List every entry of the character's lorebook."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> std::result::Result<ToolResult, ToolError> {
        let Some(world) = BoundWorld::resolve(self.session.host()) else {
            return Ok(no_world());
        };
        match world.entries_json().await {
            Ok(entries) => {
                self.session.record_tool_success();
                Ok(ToolResult::ok(entries))
            }
            Err(err) => Ok(ToolResult::failed(err.to_string())),
        }
    }
}

struct EditEntryTool {
    session: SessionRuntime,
}

#[async_trait]
impl Tool for EditEntryTool {
    fn name(&self) -> &str {
        EDIT_ENTRY
    }

    fn description(&self) -> &str {
        "Create, update or delete a lorebook entry."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["create", "update", "delete"]},
                "uid": {"type": "integer", "description": "Entry to update or delete"},
                "key": {"type": "array", "items": {"type": "string"}, "description": "Primary trigger keywords"},
                "keysecondary": {"type": "array", "items": {"type": "string"}},
                "content": {"type": "string"},
                "comment": {"type": "string", "description": "Entry title"},
                "constant": {"type": "boolean"},
                "selective": {"type": "boolean"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> std::result::Result<ToolResult, ToolError> {
        let edit: EntryEdit = parse_args(args)?;
        let Some(world) = BoundWorld::resolve(self.session.host()) else {
            return Ok(no_world());
        };

        let mut book = match world.load().await {
            Ok(book) => book,
            Err(err) => return Ok(ToolResult::failed(err.to_string())),
        };
        let summary = match edit.apply(&mut book) {
            Ok(summary) => summary,
            Err(reason) => return Ok(ToolResult::failed(reason)),
        };
        if let Err(err) = world.save(&book).await {
            return Ok(ToolResult::failed(err.to_string()));
        }

        log::info!("[lore] {} in {}", summary, world.name());
        self.session.record_tool_success();
        Ok(ToolResult::ok(summary))
    }
}

struct EndLoreTool {
    session: SessionRuntime,
}

#[async_trait]
impl Tool for EndLoreTool {
    fn name(&self) -> &str {
        END_LORE
    }

    fn description(&self) -> &str {
        "Finish lore management."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> std::result::Result<ToolResult, ToolError> {
        self.session.request_end();
        Ok(ToolResult::ok("Lore management complete"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use timeline_core::host::memory::{InMemoryHost, ModelTurn};
    use timeline_core::{CharacterCard, Settings, SessionKind};

    use super::*;
    use crate::manager::SessionManager;
    use crate::runtime::tests::{conversation, profile};
    use crate::runtime::SessionOutcome;

    fn book() -> WorldInfoBook {
        let mut book = WorldInfoBook::default();
        book.insert(WorldInfoEntry {
            uid: 0,
            key: vec!["Vex".to_string()],
            content: "A duelist.".to_string(),
            comment: "Vex".to_string(),
            ..Default::default()
        });
        book.insert(WorldInfoEntry {
            uid: 1,
            key: vec!["Aster".to_string()],
            content: "A port city.".to_string(),
            ..Default::default()
        });
        book
    }

    #[test]
    fn edits_are_tagged_by_action() {
        let edit: EntryEdit = serde_json::from_value(json!({
            "action": "update",
            "uid": "1",
            "content": "New"
        }))
        .unwrap();
        assert_eq!(
            edit,
            EntryEdit::Update(EntryUpdate {
                uid: 1,
                fields: EntryFields {
                    content: Some("New".to_string()),
                    ..Default::default()
                },
            })
        );

        let create: EntryEdit =
            serde_json::from_value(json!({"action": "create", "uid": 7, "key": "a,b"})).unwrap();
        assert!(matches!(create, EntryEdit::Create(fields) if fields.key == Some(vec!["a".to_string(), "b".to_string()])));
    }

    #[test]
    fn update_and_delete_require_a_uid() {
        assert!(serde_json::from_value::<EntryEdit>(json!({"action": "update", "content": "x"})).is_err());
        assert!(serde_json::from_value::<EntryEdit>(json!({"action": "delete"})).is_err());
        assert!(serde_json::from_value::<EntryEdit>(json!({"action": "rename", "uid": 1})).is_err());
    }

    #[test]
    fn apply_reports_missing_entries() {
        let mut book = book();
        let err = EntryEdit::Delete(EntryTarget { uid: 9 }).apply(&mut book).unwrap_err();
        assert_eq!(err, "Entry 9 not found");
        assert_eq!(book.entries.len(), 2);
    }

    #[tokio::test]
    async fn session_edits_the_bound_world() {
        let mut chat = conversation(6);
        chat.character = Some(CharacterCard {
            name: "Vex".to_string(),
            world: Some("Aster".to_string()),
        });
        let host = Arc::new(
            InMemoryHost::new(chat)
                .with_profiles(vec![profile("main", "Main"), profile("lore", "Lore")])
                .select_profile("main")
                .with_world("Aster", book()),
        );
        let mut settings = Settings::default();
        settings.lore.profile = Some("lore".to_string());
        let engine = TimelineEngine::new(host.host(), settings.into_shared());
        host.push_turns([
            ModelTurn::tool(LIST_ENTRIES, json!({})),
            ModelTurn::tool(
                EDIT_ENTRY,
                json!({"action": "create", "key": "harbor, docks", "content": "Line one\\nLine two", "comment": "Harbor"}),
            ),
            ModelTurn::tool(EDIT_ENTRY, json!({"action": "update", "uid": 0, "constant": true})),
            ModelTurn::tool(EDIT_ENTRY, json!({"action": "delete", "uid": 1})),
            ModelTurn::tool(END_LORE, json!({})),
        ]);
        let manager = SessionManager::new(host.host(), engine.timeline().settings().clone());

        let outcome = manager.start_lore(&engine).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Completed);
        let world = host.world("Aster").unwrap();
        assert!(world.get(0).unwrap().constant);
        assert!(world.get(1).is_none());
        let created = world.get(2).unwrap();
        assert_eq!(created.key, vec!["harbor", "docks"]);
        assert_eq!(created.content, "Line one\nLine two");
        assert_eq!(host.messages().len(), 6);
        assert!(host.metadata(SessionKind::LoreManagement.metadata_key()).is_none());
    }

    #[tokio::test]
    async fn lore_session_needs_a_bound_world() {
        let host = Arc::new(
            InMemoryHost::new(conversation(2)).with_profiles(vec![profile("lore", "Lore")]),
        );
        let mut settings = Settings::default();
        settings.lore.profile = Some("lore".to_string());
        let engine = TimelineEngine::new(host.host(), settings.into_shared());
        let manager = SessionManager::new(host.host(), engine.timeline().settings().clone());

        let err = manager.start_lore(&engine).await.unwrap_err();

        assert!(matches!(err, SessionError::NoWorld));
        assert!(host.command_log().is_empty());
    }
}
