use serde::{Deserialize, Serialize};

use super::message::Message;

/// Opaque backend handle standing in for the first `covered` turns of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub token: String,
    pub covered: usize,
}

/// The ordered turn history exchanged with the model backend.
///
/// Turns are only ever appended; the single way to shrink the history is
/// [`ConversationState::clear`], which drops everything at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    continuation: Option<Continuation>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all turns along with any continuation token
    pub fn clear(&mut self) {
        self.messages.clear();
        self.continuation = None;
    }

    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Record a token that covers every turn currently in the history
    pub fn set_continuation<S: Into<String>>(&mut self, token: S) {
        self.continuation = Some(Continuation {
            token: token.into(),
            covered: self.messages.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_clear() {
        let mut state = ConversationState::new();
        assert!(state.is_empty());

        state.push(Message::user().with_text("hola"));
        state.push(Message::assistant().with_text("¡Hola!"));
        state.set_continuation("resp_1");
        assert_eq!(state.len(), 2);
        assert_eq!(state.continuation().unwrap().covered, 2);
        assert_eq!(state.last().unwrap().text(), "¡Hola!");

        state.clear();
        assert!(state.is_empty());
        assert!(state.continuation().is_none());
    }
}
