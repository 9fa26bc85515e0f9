use std::time::Duration;

use tokio::sync::broadcast;

/// Host events the timeline reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    AppReady,
    UserMessageRendered(usize),
    CharacterMessageRendered(usize),
    ChatChanged(String),
    MessageSent(usize),
    MoreMessagesLoaded,
    CharacterRenamed { old_name: String, new_name: String },
    ExtensionSettingsLoaded,
    /// A generation finished; carries the index of the last message.
    GenerationEnded(usize),
    ChatCompletionModelChanged(String),
    OnlineStatusChanged(String),
    ConnectionProfileLoaded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AppReady,
    UserMessageRendered,
    CharacterMessageRendered,
    ChatChanged,
    MessageSent,
    MoreMessagesLoaded,
    CharacterRenamed,
    ExtensionSettingsLoaded,
    GenerationEnded,
    ChatCompletionModelChanged,
    OnlineStatusChanged,
    ConnectionProfileLoaded,
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::AppReady => EventKind::AppReady,
            HostEvent::UserMessageRendered(_) => EventKind::UserMessageRendered,
            HostEvent::CharacterMessageRendered(_) => EventKind::CharacterMessageRendered,
            HostEvent::ChatChanged(_) => EventKind::ChatChanged,
            HostEvent::MessageSent(_) => EventKind::MessageSent,
            HostEvent::MoreMessagesLoaded => EventKind::MoreMessagesLoaded,
            HostEvent::CharacterRenamed { .. } => EventKind::CharacterRenamed,
            HostEvent::ExtensionSettingsLoaded => EventKind::ExtensionSettingsLoaded,
            HostEvent::GenerationEnded(_) => EventKind::GenerationEnded,
            HostEvent::ChatCompletionModelChanged(_) => EventKind::ChatCompletionModelChanged,
            HostEvent::OnlineStatusChanged(_) => EventKind::OnlineStatusChanged,
            HostEvent::ConnectionProfileLoaded(_) => EventKind::ConnectionProfileLoaded,
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus for host events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: HostEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    /// Arms a one-shot subscription for the first event of any of `kinds`.
    ///
    /// Subscribe before performing the action whose completion you wait for,
    /// otherwise the event can fire before the waiter exists.
    pub fn waiter(&self, kinds: &[EventKind]) -> EventWaiter {
        EventWaiter {
            receiver: self.sender.subscribe(),
            kinds: kinds.to_vec(),
        }
    }
}

pub struct EventWaiter {
    receiver: broadcast::Receiver<HostEvent>,
    kinds: Vec<EventKind>,
}

impl EventWaiter {
    /// Resolves with the first matching event, or `None` on timeout.
    pub async fn wait(mut self, timeout: Duration) -> Option<HostEvent> {
        let kinds = self.kinds;
        let receiver = &mut self.receiver;
        let next = async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if kinds.contains(&event.kind()) => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, next).await.ok().flatten()
    }
}
