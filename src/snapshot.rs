use std::future::Future;

use crate::api::models::{Conversation, Message, Participant};
use crate::error::Result;

/// REST backend the snapshot loader reads from.
pub trait SnapshotSource: Clone + Send + Sync + 'static {
    fn conversations(&self) -> impl Future<Output = Result<Vec<Conversation>>> + Send;

    fn messages(&self, conversation_id: &str) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn mark_read(&self, conversation_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the conversation with `user_id`, creating it server-side if needed.
    fn conversation_with(&self, user_id: &str) -> impl Future<Output = Result<Conversation>> + Send;

    fn current_user(&self) -> impl Future<Output = Result<Participant>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageSnapshot {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    /// False when the server-side mark-read call failed after the fetch.
    pub marked_read: bool,
}

#[derive(Clone)]
pub struct SnapshotLoader<S> {
    source: S,
}

impl<S: SnapshotSource> SnapshotLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Id of the signed-in user: `configured` when set, otherwise asked of the server.
    pub async fn resolve_user(&self, configured: &str) -> Result<String> {
        if !configured.trim().is_empty() {
            return Ok(configured.trim().to_string());
        }
        let user = self.source.current_user().await?;
        log::info!("signed in as {} ({})", user.name, user.id);
        Ok(user.id)
    }

    /// Conversation list, most recently active first.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let mut list = self.source.conversations().await?;
        list.sort_by(|a, b| b.activity().cmp(&a.activity()));
        log::debug!("loaded {} conversations", list.len());
        Ok(list)
    }

    /// Full history for one conversation in ascending time order, then marks it
    /// read. The read call is only issued once the history is in hand.
    pub async fn load_messages(&self, conversation_id: &str) -> Result<MessageSnapshot> {
        let mut messages = self.source.messages(conversation_id).await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let marked_read = match self.source.mark_read(conversation_id).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("mark-read for {} failed: {}", conversation_id, e);
                false
            }
        };

        Ok(MessageSnapshot {
            conversation_id: conversation_id.to_string(),
            messages,
            marked_read,
        })
    }
}
