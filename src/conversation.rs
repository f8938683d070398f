//! Append-only conversation log.
//!
//! A [`Conversation`] pairs a model name with an ordered sequence of
//! [`Message`]s. The sequence lives behind a shared copy-on-write handle, so
//! taking a [`Conversation::snapshot`] before a provider request is a cheap
//! pointer clone, and only the first append after it pays for a copy.

use std::sync::Arc;

use crate::message::{Message, Role};

/// An ordered, append-only message log bound to one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    model: String,
    messages: Arc<Vec<Message>>,
}

/// A saved view of a conversation's message sequence.
///
/// Restoring it with [`Conversation::restore`] makes the conversation
/// indistinguishable from the moment the snapshot was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    messages: Arc<Vec<Message>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl Conversation {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Arc::new(Vec::new()),
        }
    }

    /// Creates a conversation whose first message is `system_prompt`.
    ///
    /// An empty prompt yields a conversation without a system message.
    pub fn with_system(model: impl Into<String>, system_prompt: &str) -> Self {
        let mut conversation = Self::new(model);
        if !system_prompt.trim().is_empty() {
            conversation.append(Message::system(system_prompt));
        }
        conversation
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a message to the end of the log.
    ///
    /// A system message is only accepted as the very first entry; any other
    /// placement is ignored and logged.
    pub fn append(&mut self, message: Message) {
        if message.role == Role::System && !self.messages.is_empty() {
            tracing::warn!(
                existing = self.messages.len(),
                "ignoring system message appended after conversation start"
            );
            return;
        }
        Arc::make_mut(&mut self.messages).push(message);
    }

    /// Returns the conversation extended by `message`.
    pub fn with_message(mut self, message: Message) -> Self {
        self.append(message);
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            messages: Arc::clone(&self.messages),
        }
    }

    /// Replaces the message sequence with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.messages = snapshot.messages;
    }

    /// Starts over, keeping only the system prompt (if there was one).
    pub fn reset(&mut self) {
        let system = self
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .cloned();
        self.messages = Arc::new(system.into_iter().collect());
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_of_role(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub fn messages_by_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }

    pub fn has_system_message(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == Role::System)
    }

    /// True when the newest message is a user turn with exactly `text`.
    ///
    /// Used to skip re-appending a message a UI already inserted optimistically.
    pub fn ends_with_user_text(&self, text: &str) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == text.trim())
    }
}
