use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::conversation::ConversationState;
use crate::models::message::{Message, MessageContent};

pub const DEFAULT_MAX_TURNS: usize = 60;
pub const DEFAULT_MAX_CONVERSATIONS: usize = 256;
pub const MAX_PENDING_BLOCKS: usize = 20;

/// Identifies one conversation; the Discord channel id, DMs included
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_turns: usize,
    pub max_conversations: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
        }
    }
}

/// One channel's history plus context seen since the bot last spoke there
#[derive(Debug, Default)]
pub struct Conversation {
    pub state: ConversationState,
    pending: VecDeque<MessageContent>,
}

impl Conversation {
    /// Remember a block from a message that was not addressed to the bot
    pub fn remember(&mut self, block: MessageContent) {
        if self.pending.len() == MAX_PENDING_BLOCKS {
            self.pending.pop_front();
        }
        self.pending.push_back(block);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Build the next user turn: remembered context first, then `content`
    pub fn take_user_turn(&mut self, content: Vec<MessageContent>) -> Message {
        let mut message = Message::user();
        message.content.extend(self.pending.drain(..));
        message.content.extend(content);
        message
    }
}

/// Conversations keyed by channel.
///
/// Each entry has its own lock, so turns in one channel run one at a time
/// while different channels proceed concurrently.
pub struct ConversationStore {
    config: StoreConfig,
    inner: std::sync::Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<ConversationKey, Arc<Mutex<Conversation>>>,
    // least recently used at the front
    order: VecDeque<ConversationKey>,
}

impl ConversationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: std::sync::Mutex::new(StoreInner::default()),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Fetch the conversation for `key`, creating it on first use
    pub fn entry(&self, key: &ConversationKey) -> Arc<Mutex<Conversation>> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(position) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(position);
        }
        inner.order.push_back(key.clone());

        if let Some(entry) = inner.entries.get(key) {
            return entry.clone();
        }

        let entry = Arc::new(Mutex::new(Conversation::default()));
        inner.entries.insert(key.clone(), entry.clone());

        while inner.entries.len() > self.config.max_conversations.max(1) {
            match inner.order.pop_front() {
                Some(evicted) => {
                    debug!(key = %evicted, "evicting least recently used conversation");
                    inner.entries.remove(&evicted);
                }
                None => break,
            }
        }

        entry
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains_key(key))
            .unwrap_or_default()
    }

    /// Clear a conversation that has reached the turn ceiling. Returns whether it was cleared.
    pub fn enforce_capacity(&self, conversation: &mut Conversation) -> bool {
        if conversation.state.len() >= self.config.max_turns {
            info!(
                turns = conversation.state.len(),
                max_turns = self.config.max_turns,
                "conversation reached its turn limit, starting over"
            );
            conversation.state.clear();
            true
        } else {
            false
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
