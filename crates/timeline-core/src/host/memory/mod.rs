//! In-process host.
//!
//! Backs every capability trait with plain memory so the timeline can run
//! outside a chat application: the CLI loads a chat file into it, and tests
//! script model turns and profile responses against it.

mod generation;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

pub use generation::ModelTurn;

use super::{
    ChatHost, CommandExecutor, CommandRegistrar, ConnectionProfile, EventBus, GenerationControl,
    Host, HostCommand, HostEvent, Interaction, MacroFn, MacroRegistrar, NoticeLevel,
    PersonaFormatter, ProfileRequest, ProfileService, RetryDecision, SharedConversation,
    SlashCommandSpec, WorldInfoBook, WorldInfoStore,
};
use crate::error::HostError;
use crate::host::commands::NO_PROFILE;
use crate::model::{ChatMessage, Conversation};
use crate::tokens::{HeuristicTokenCounter, TokenCounter};
use crate::tools::ToolRegistry;

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_MAX_CONTEXT: usize = 8192;

#[derive(Default)]
struct Counters {
    metadata_saves: AtomicUsize,
    saves: AtomicUsize,
    reloads: AtomicUsize,
    backups: AtomicUsize,
    generations: AtomicUsize,
}

pub struct InMemoryHost {
    conversation: SharedConversation,
    events: EventBus,
    tools: Option<Arc<ToolRegistry>>,
    token_counter: Arc<dyn TokenCounter>,
    profiles: RwLock<Vec<ConnectionProfile>>,
    selected: RwLock<Option<String>>,
    presets: HashMap<String, u32>,
    default_max_tokens: u32,
    max_context: usize,
    responses: Mutex<VecDeque<Result<String, HostError>>>,
    requests: Mutex<Vec<ProfileRequest>>,
    turns: Mutex<VecDeque<ModelTurn>>,
    generating: AtomicBool,
    stop_requested: AtomicBool,
    swiping_allowed: AtomicBool,
    failing_swipes: AtomicUsize,
    failing_triggers: AtomicUsize,
    failing_saves: AtomicUsize,
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    retry_decisions: Mutex<VecDeque<RetryDecision>>,
    retry_prompts: Mutex<Vec<String>>,
    worlds: Mutex<HashMap<String, WorldInfoBook>>,
    macros: Mutex<HashMap<String, MacroFn>>,
    slash_commands: Mutex<Vec<SlashCommandSpec>>,
    command_log: Mutex<Vec<HostCommand>>,
    counters: Counters,
}

impl InMemoryHost {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation: Arc::new(RwLock::new(conversation)),
            events: EventBus::default(),
            tools: Some(Arc::new(ToolRegistry::new())),
            token_counter: Arc::new(HeuristicTokenCounter::default()),
            profiles: RwLock::new(Vec::new()),
            selected: RwLock::new(None),
            presets: HashMap::new(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            max_context: DEFAULT_MAX_CONTEXT,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            turns: Mutex::new(VecDeque::new()),
            generating: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            swiping_allowed: AtomicBool::new(true),
            failing_swipes: AtomicUsize::new(0),
            failing_triggers: AtomicUsize::new(0),
            failing_saves: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
            retry_decisions: Mutex::new(VecDeque::new()),
            retry_prompts: Mutex::new(Vec::new()),
            worlds: Mutex::new(HashMap::new()),
            macros: Mutex::new(HashMap::new()),
            slash_commands: Mutex::new(Vec::new()),
            command_log: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_profiles(self, profiles: Vec<ConnectionProfile>) -> Self {
        *self.profiles.write() = profiles;
        self
    }

    pub fn select_profile(self, id: impl Into<String>) -> Self {
        *self.selected.write() = Some(id.into());
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>, max_tokens: u32) -> Self {
        self.presets.insert(preset.into(), max_tokens);
        self
    }

    pub fn with_max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    pub fn with_world(self, name: impl Into<String>, book: WorldInfoBook) -> Self {
        self.worlds.lock().insert(name.into(), book);
        self
    }

    /// Drops the tool manager, as a host without function calling would.
    pub fn without_tools(mut self) -> Self {
        self.tools = None;
        self
    }

    /// Assembles the capability bundle backed by this host.
    pub fn host(self: &Arc<Self>) -> Host {
        Host {
            chat: self.clone(),
            commands: self.clone(),
            profiles: self.clone(),
            generation: self.clone(),
            interaction: self.clone(),
            formatter: Arc::new(PersonaFormatter::new(self.conversation.clone())),
            tokens: self.token_counter.clone(),
            events: self.events.clone(),
            tools: self
                .tools
                .as_ref()
                .map(|tools| tools.clone() as Arc<dyn crate::tools::ToolManager>),
            world_info: Some(self.clone()),
            macros: Some(self.clone()),
            slash_commands: Some(self.clone()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools.as_ref()
    }

    pub fn push_message(&self, message: ChatMessage) -> usize {
        let mut conversation = self.conversation.write();
        conversation.messages.push(message);
        conversation.messages.len() - 1
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.conversation.read().messages.clone()
    }

    pub fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.conversation.read().metadata.get(key).cloned()
    }

    // Scripting

    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(text.into()));
    }

    pub fn push_response_error(&self, error: HostError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn push_turn(&self, turn: ModelTurn) {
        self.turns.lock().push_back(turn);
    }

    pub fn push_turns(&self, turns: impl IntoIterator<Item = ModelTurn>) {
        self.turns.lock().extend(turns);
    }

    pub fn push_retry_decision(&self, decision: RetryDecision) {
        self.retry_decisions.lock().push_back(decision);
    }

    pub fn set_swiping_allowed(&self, allowed: bool) {
        self.swiping_allowed.store(allowed, Ordering::SeqCst);
    }

    /// The next `count` swipes fail.
    pub fn fail_swipes(&self, count: usize) {
        self.failing_swipes.store(count, Ordering::SeqCst);
    }

    /// The next `count` trigger commands fail.
    pub fn fail_triggers(&self, count: usize) {
        self.failing_triggers.store(count, Ordering::SeqCst);
    }

    /// The next `count` conversation saves fail.
    pub fn fail_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Loads another conversation in place of the current one and announces
    /// the switch.
    pub fn switch_chat(&self, conversation: Conversation) {
        let chat_id = conversation.chat_id.clone();
        *self.conversation.write() = conversation;
        self.events.emit(HostEvent::ChatChanged(chat_id));
    }

    // Inspection

    pub fn requests(&self) -> Vec<ProfileRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().clone()
    }

    pub fn retry_prompts(&self) -> Vec<String> {
        self.retry_prompts.lock().clone()
    }

    pub fn command_log(&self) -> Vec<HostCommand> {
        self.command_log.lock().clone()
    }

    pub fn selected_profile_id(&self) -> Option<String> {
        self.selected.read().clone()
    }

    pub fn world(&self, name: &str) -> Option<WorldInfoBook> {
        self.worlds.lock().get(name).cloned()
    }

    pub fn macro_value(&self, name: &str) -> Option<String> {
        let value = self.macros.lock().get(name).cloned();
        value.map(|value| value())
    }

    pub fn registered_commands(&self) -> Vec<SlashCommandSpec> {
        self.slash_commands.lock().clone()
    }

    pub fn generations(&self) -> usize {
        self.counters.generations.load(Ordering::SeqCst)
    }

    pub fn metadata_saves(&self) -> usize {
        self.counters.metadata_saves.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.counters.saves.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.counters.reloads.load(Ordering::SeqCst)
    }

    pub fn backups(&self) -> usize {
        self.counters.backups.load(Ordering::SeqCst)
    }

    fn set_hidden(&self, start: usize, end: usize, hidden: bool) {
        let mut conversation = self.conversation.write();
        let last = conversation.messages.len();
        for message in conversation.messages.iter_mut().take(end.saturating_add(1).min(last)).skip(start) {
            message.is_system = hidden;
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn swap_profile(&self, name: Option<String>) -> Result<String, HostError> {
        let Some(name) = name.filter(|name| name != NO_PROFILE) else {
            *self.selected.write() = None;
            return Ok(String::new());
        };
        let profile = self
            .find_profile(&name)
            .ok_or_else(|| HostError::UnknownProfile(name.clone()))?;
        *self.selected.write() = Some(profile.id.clone());
        self.events.emit(HostEvent::ChatCompletionModelChanged(
            profile.model.clone().unwrap_or_default(),
        ));
        self.events
            .emit(HostEvent::ConnectionProfileLoaded(profile.name.clone()));
        Ok(profile.name)
    }
}

#[async_trait]
impl ChatHost for InMemoryHost {
    fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    fn save_metadata_debounced(&self) {
        self.counters.metadata_saves.fetch_add(1, Ordering::SeqCst);
    }

    async fn save_conversation(&self) -> Result<(), HostError> {
        if Self::take_failure(&self.failing_saves) {
            return Err(HostError::Save("disk full".to_string()));
        }
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// The in-memory transcript is already authoritative.
    async fn reload_conversation(&self) -> Result<(), HostError> {
        self.counters.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_backup(&self) -> Result<(), HostError> {
        self.counters.backups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for InMemoryHost {
    async fn execute(&self, command: HostCommand) -> Result<String, HostError> {
        self.command_log.lock().push(command.clone());

        match command {
            HostCommand::Send { text } => {
                let user = self.conversation.read().user_name.clone();
                let index = self.push_message(ChatMessage::user(user, text));
                self.events.emit(HostEvent::MessageSent(index));
                Ok(String::new())
            }
            HostCommand::Hide { start, end } => {
                self.set_hidden(start, end, true);
                Ok(String::new())
            }
            HostCommand::Unhide { start, end } => {
                self.set_hidden(start, end, false);
                Ok(String::new())
            }
            HostCommand::Cut { start, end } => {
                let mut conversation = self.conversation.write();
                let len = conversation.messages.len();
                if start < len {
                    let end = end.min(len - 1);
                    conversation.messages.drain(start..=end);
                }
                Ok(String::new())
            }
            HostCommand::Trigger => {
                if Self::take_failure(&self.failing_triggers) {
                    return Err(HostError::Command {
                        command: "/trigger".to_string(),
                        message: "generation failed to start".to_string(),
                    });
                }
                self.run_generation(false).await?;
                Ok(String::new())
            }
            HostCommand::Profile { name } => self.swap_profile(name),
            HostCommand::Comment { text } => {
                let mut comment = ChatMessage::character("Note", text);
                comment.is_system = true;
                self.push_message(comment);
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl ProfileService for InMemoryHost {
    fn profiles(&self) -> Vec<ConnectionProfile> {
        self.profiles.read().clone()
    }

    fn selected_profile(&self) -> Option<ConnectionProfile> {
        let selected = self.selected.read().clone()?;
        self.find_profile(&selected)
    }

    fn preset_max_tokens(&self, preset: &str) -> Option<u32> {
        self.presets.get(preset).copied()
    }

    fn default_max_tokens(&self) -> u32 {
        self.default_max_tokens
    }

    fn max_context(&self) -> usize {
        self.max_context
    }

    async fn send_request(&self, request: ProfileRequest) -> Result<String, HostError> {
        let profile = request.profile_id.clone();
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(HostError::Request {
                    profile,
                    message: "no scripted response".to_string(),
                })
            })
    }
}

#[async_trait]
impl GenerationControl for InMemoryHost {
    fn is_swiping_allowed(&self) -> bool {
        self.swiping_allowed.load(Ordering::SeqCst) && !self.generating.load(Ordering::SeqCst)
    }

    async fn swipe_right(&self) -> Result<(), HostError> {
        if Self::take_failure(&self.failing_swipes) {
            return Err(HostError::Swipe("swipe rejected".to_string()));
        }
        self.run_generation(true).await
    }

    async fn stop_generation(&self) -> bool {
        let running = self.generating.load(Ordering::SeqCst);
        if running {
            self.stop_requested.store(true, Ordering::SeqCst);
        }
        running
    }
}

#[async_trait]
impl Interaction for InMemoryHost {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().push((level, message.to_string()));
    }

    async fn confirm_retry(&self, operation: &str, reason: &str) -> RetryDecision {
        self.retry_prompts
            .lock()
            .push(format!("{}: {}", operation, reason));
        self.retry_decisions
            .lock()
            .pop_front()
            .unwrap_or(RetryDecision::Cancel)
    }
}

#[async_trait]
impl WorldInfoStore for InMemoryHost {
    async fn load_world(&self, name: &str) -> Result<WorldInfoBook, HostError> {
        self.worlds
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::WorldInfo(format!("world `{}` not found", name)))
    }

    async fn save_world(&self, name: &str, book: &WorldInfoBook) -> Result<(), HostError> {
        self.worlds.lock().insert(name.to_string(), book.clone());
        Ok(())
    }
}

impl MacroRegistrar for InMemoryHost {
    fn register_macro(&self, name: &str, value: MacroFn) {
        self.macros.lock().insert(name.to_string(), value);
    }
}

impl CommandRegistrar for InMemoryHost {
    fn register_command(&self, spec: SlashCommandSpec) {
        self.slash_commands.lock().push(spec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EventKind;

    fn conversation(len: usize) -> Conversation {
        let mut conversation = Conversation::new("chat-1");
        conversation.user_name = "Mara".to_string();
        for i in 0..len {
            conversation
                .messages
                .push(ChatMessage::user("Mara", format!("message {}", i)));
        }
        conversation
    }

    fn profile(id: &str, name: &str) -> ConnectionProfile {
        ConnectionProfile {
            id: id.to_string(),
            name: name.to_string(),
            api: Some("openai".to_string()),
            model: Some("gpt-4o".to_string()),
            preset: None,
            reasoning_template: None,
        }
    }

    #[tokio::test]
    async fn hide_unhide_and_cut_follow_slash_semantics() {
        let host = Arc::new(InMemoryHost::new(conversation(6)));

        host.execute(HostCommand::Hide { start: 1, end: 3 }).await.unwrap();
        let hidden: Vec<bool> = host.messages().iter().map(|m| m.is_system).collect();
        assert_eq!(hidden, vec![false, true, true, true, false, false]);

        host.execute(HostCommand::Unhide { start: 0, end: 99 }).await.unwrap();
        assert!(host.messages().iter().all(|m| !m.is_system));

        host.execute(HostCommand::Cut { start: 4, end: 99 }).await.unwrap();
        assert_eq!(host.messages().len(), 4);
    }

    #[tokio::test]
    async fn profile_swap_announces_model_change() {
        let host = Arc::new(
            InMemoryHost::new(conversation(0))
                .with_profiles(vec![profile("p1", "Main"), profile("p2", "Agent")])
                .select_profile("p1"),
        );
        let waiter = host
            .events()
            .waiter(&[EventKind::ChatCompletionModelChanged]);

        host.execute(HostCommand::Profile {
            name: Some("Agent".to_string()),
        })
        .await
        .unwrap();

        assert!(waiter.wait(std::time::Duration::from_secs(1)).await.is_some());
        assert_eq!(host.selected_profile_id().as_deref(), Some("p2"));

        host.execute(HostCommand::Profile { name: None }).await.unwrap();
        assert!(host.selected_profile().is_none());
    }

    #[tokio::test]
    async fn unknown_profile_is_an_error() {
        let host = Arc::new(InMemoryHost::new(conversation(0)));
        let err = host
            .execute(HostCommand::Profile {
                name: Some("Ghost".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err, HostError::UnknownProfile("Ghost".to_string()));
    }

    #[tokio::test]
    async fn send_request_replays_scripted_responses() {
        let host = Arc::new(InMemoryHost::new(conversation(0)));
        host.push_response("summary");

        let request = ProfileRequest {
            profile_id: "p1".to_string(),
            messages: Vec::new(),
            max_tokens: 10,
            overrides: Default::default(),
        };
        assert_eq!(host.send_request(request.clone()).await.unwrap(), "summary");
        assert!(host.send_request(request).await.is_err());
        assert_eq!(host.request_count(), 2);
    }

    #[tokio::test]
    async fn confirm_retry_defaults_to_cancel() {
        let host = InMemoryHost::new(conversation(0));
        host.push_retry_decision(RetryDecision::Retry);
        assert_eq!(host.confirm_retry("summarize", "empty").await, RetryDecision::Retry);
        assert_eq!(host.confirm_retry("summarize", "empty").await, RetryDecision::Cancel);
        assert_eq!(host.retry_prompts().len(), 2);
    }
}
