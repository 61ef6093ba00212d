use crate::api::Backend;
use crate::api::models::Conversation;
use crate::error::ApiError;
use crate::storage::Cache;
use crate::store::{ConversationStore, MessageEntry, MessageStore};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify};

/// Shared client state of one organization's inbox: the backend handle and
/// the two caches everything else reads and invalidates.
pub struct Inbox {
    backend: Arc<dyn Backend>,
    organization_id: String,
    instance_id: Option<String>,
    message_limit: usize,
    conversations: Mutex<ConversationStore>,
    messages: Mutex<MessageStore>,
    invalidated: Notify,
    cache: Option<Cache>,
}

impl Inbox {
    pub fn new(backend: Arc<dyn Backend>, organization_id: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            backend,
            organization_id: organization_id.into(),
            instance_id,
            message_limit: 200,
            conversations: Mutex::new(ConversationStore::new()),
            messages: Mutex::new(MessageStore::new()),
            invalidated: Notify::new(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn default_instance(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub async fn conversations(&self) -> MutexGuard<'_, ConversationStore> {
        self.conversations.lock().await
    }

    pub async fn messages(&self) -> MutexGuard<'_, MessageStore> {
        self.messages.lock().await
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().await.get(id).cloned()
    }

    pub async fn message_snapshot(&self) -> Vec<MessageEntry> {
        self.messages.lock().await.entries().to_vec()
    }

    /// Fills the conversation list from the local cache if nothing was
    /// fetched yet. The store stays marked for refresh.
    pub async fn warm_from_cache(&self) {
        let Some(cache) = &self.cache else { return };
        match cache.load_conversations(&self.organization_id, 500) {
            Ok(rows) if !rows.is_empty() => {
                let mut store = self.conversations.lock().await;
                if store.list().is_empty() {
                    store.replace_all(rows);
                    store.invalidate();
                }
            }
            Ok(_) => {}
            Err(e) => warn!("conversation cache unreadable: {e}"),
        }
    }

    pub async fn invalidate_conversations(&self) {
        self.conversations.lock().await.invalidate();
        self.invalidated.notify_one();
    }

    pub async fn invalidate_all(&self) {
        self.conversations.lock().await.invalidate();
        self.messages.lock().await.invalidate();
        self.invalidated.notify_one();
    }

    pub async fn invalidate_messages(&self) {
        self.messages.lock().await.invalidate();
        self.invalidated.notify_one();
    }

    /// Resolves after the next invalidation.
    pub async fn invalidated(&self) {
        self.invalidated.notified().await
    }

    pub async fn refresh_conversations(&self) -> Result<(), ApiError> {
        let generation = self.conversations.lock().await.generation();
        let rows = self
            .backend
            .list_conversations(&self.organization_id, self.instance_id.as_deref())
            .await?;
        debug!("fetched {} conversations", rows.len());
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.upsert_conversations(&rows) {
                warn!("failed to cache conversations: {e}");
            }
        }
        self.conversations.lock().await.replace_all_as_of(rows, generation);
        Ok(())
    }

    /// Refetches the open conversation's history, if one is open.
    pub async fn refresh_messages(&self) -> Result<(), ApiError> {
        let (conversation_id, generation) = {
            let store = self.messages.lock().await;
            match store.conversation_id() {
                Some(id) => (id.to_string(), store.generation()),
                None => return Ok(()),
            }
        };
        let rows = self.backend.list_messages(&conversation_id, self.message_limit).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.upsert_messages(&rows) {
                warn!("failed to cache messages: {e}");
            }
        }
        if !self.messages.lock().await.replace_all_as_of(&conversation_id, rows, generation) {
            debug!("dropped history of {conversation_id}: no longer open");
        }
        Ok(())
    }

    /// Refetches whichever stores were invalidated.
    pub async fn refresh_stale(&self) -> Result<(), ApiError> {
        if self.conversations.lock().await.needs_refresh() {
            self.refresh_conversations().await?;
        }
        if self.messages.lock().await.needs_refresh() {
            self.refresh_messages().await?;
        }
        Ok(())
    }

    /// Selects a conversation, loads its history and clears its unread badge.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        {
            let mut store = self.messages.lock().await;
            store.select(conversation_id);
            if let Some(cache) = &self.cache {
                match cache.load_messages(conversation_id, self.message_limit) {
                    Ok(rows) if !rows.is_empty() => {
                        store.replace_all(conversation_id, rows);
                        store.invalidate();
                    }
                    Ok(_) => {}
                    Err(e) => warn!("message cache unreadable: {e}"),
                }
            }
        }
        self.refresh_messages().await?;
        if let Err(e) = self.backend.mark_conversation_read(conversation_id).await {
            warn!("failed to mark {conversation_id} as read: {e}");
        }
        self.conversations.lock().await.mark_read(conversation_id);
        Ok(())
    }
}
