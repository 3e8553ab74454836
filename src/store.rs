use std::collections::{HashMap, HashSet, VecDeque};

use crate::api::models::{Conversation, Message};

/// How many message ids per conversation `record_preview` remembers.
const RECENT_PREVIEW_IDS: usize = 32;

/// In-memory state for the conversation list and the open conversation's history.
///
/// Only the active conversation keeps a message history; every other
/// conversation is represented by its list entry alone.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<String>,
    messages: Vec<Message>,
    message_ids: HashSet<String>,
    /// Ids already applied to each list entry's preview, newest last.
    previewed: HashMap<String, VecDeque<String>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the list with a fresh snapshot. Conversations the server
    /// omitted are dropped; the active one keeps its history.
    pub fn replace_conversations(&mut self, mut list: Vec<Conversation>) {
        let mut seen = HashSet::new();
        list.retain(|c| seen.insert(c.id.clone()));
        self.conversations = list;
        self.sort_conversations();
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort_conversations();
    }

    fn sort_conversations(&mut self) {
        // stable, so ties keep their previous relative order
        self.conversations
            .sort_by(|a, b| b.activity().cmp(&a.activity()));
    }

    /// Updates a list entry's preview from a message. Bumps the unread count
    /// when the message is from someone else and the conversation is not open.
    /// A redelivered message changes nothing. Returns false when the
    /// conversation is not in the list.
    pub fn record_preview(&mut self, message: &Message, current_user: &str) -> bool {
        let is_active = self.active.as_deref() == Some(message.conversation_id.as_str());
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return false;
        };

        let recent = self.previewed.entry(conv.id.clone()).or_default();
        if recent.contains(&message.id) {
            return true;
        }
        if recent.len() == RECENT_PREVIEW_IDS {
            recent.pop_front();
        }
        recent.push_back(message.id.clone());

        let newer = conv
            .activity()
            .map_or(true, |at| message.created_at >= at);
        if newer {
            conv.last_message = Some(message.preview());
            conv.last_message_at = Some(message.created_at);
        }
        if !is_active && !message.is_from(current_user) {
            conv.unread += 1;
        }
        self.sort_conversations();
        true
    }

    /// Inserts a message into the active conversation's history.
    ///
    /// A repeated id is a no-op, and a late arrival lands at its timestamp
    /// position rather than the tail. Returns whether the history changed.
    pub fn append_message(&mut self, message: Message) -> bool {
        if self.active.as_deref() != Some(message.conversation_id.as_str()) {
            return false;
        }
        if self.message_ids.contains(&message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.message_ids.insert(message.id.clone());
        self.messages.insert(at, message);
        true
    }

    /// Installs a history snapshot for the active conversation. Messages already
    /// present that the snapshot lacks are kept.
    pub fn merge_history(&mut self, conversation_id: &str, history: Vec<Message>) -> usize {
        history
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| self.append_message(m))
            .filter(|added| *added)
            .count()
    }

    pub fn mark_conversation_read(&mut self, conversation_id: &str) {
        if let Some(conv) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conv.unread = 0;
        }
    }

    /// Flips the read flag on the current user's own messages in the open
    /// conversation. Messages authored by anyone else are left as they are.
    pub fn mark_own_messages_read(&mut self, conversation_id: &str, current_user: &str) -> usize {
        if self.active.as_deref() != Some(conversation_id) {
            return 0;
        }
        let mut flipped = 0;
        for m in self.messages.iter_mut() {
            if m.is_from(current_user) && !m.read {
                m.read = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Switches the open conversation, dropping the previous history.
    pub fn set_active_conversation(&mut self, conversation_id: Option<&str>) {
        if self.active.as_deref() == conversation_id {
            return;
        }
        self.active = conversation_id.map(str::to_string);
        self.messages.clear();
        self.message_ids.clear();
    }
}
