use crate::api::models::{Message, MessageStatus, SendReceipt};
use log::debug;
use uuid::Uuid;

/// Whether an entry has been acknowledged by the server yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKey {
    Pending { local_id: Uuid },
    Confirmed { server_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntry {
    pub key: EntryKey,
    pub message: Message,
}

impl MessageEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self.key, EntryKey::Pending { .. })
    }

    fn server_id(&self) -> Option<&str> {
        match &self.key {
            EntryKey::Confirmed { server_id } => Some(server_id),
            EntryKey::Pending { .. } => None,
        }
    }

    /// A pending entry matches a server row carrying its correlation id or
    /// the provider id we got back from the send call.
    fn correlates_with(&self, row: &Message) -> bool {
        let EntryKey::Pending { local_id } = &self.key else {
            return false;
        };
        let by_client_id = row.client_message_id.as_deref() == Some(local_id.to_string().as_str());
        let by_provider_id = matches!(
            (&self.message.provider_message_id, &row.provider_message_id),
            (Some(a), Some(b)) if a == b
        );
        by_client_id || by_provider_id
    }
}

/// Ordered history of the currently open conversation, mixing server rows
/// with optimistic local entries.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversation_id: Option<String>,
    entries: Vec<MessageEntry>,
    stale: bool,
    generation: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to another conversation, dropping the previous history.
    pub fn select(&mut self, conversation_id: &str) {
        if self.conversation_id.as_deref() != Some(conversation_id) {
            self.conversation_id = Some(conversation_id.to_string());
            self.entries.clear();
        }
        self.invalidate();
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
        self.generation += 1;
    }

    pub fn needs_refresh(&self) -> bool {
        self.stale && self.conversation_id.is_some()
    }

    /// Bumped by every invalidation. Snapshot it before a fetch and hand it
    /// to `replace_all_as_of`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_open(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    // Stable, so optimistic entries stay in call order.
    fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.message.created_at.cmp(&b.message.created_at));
    }

    /// Authoritative refetch. Local entries the server does not know about
    /// yet survive it. Returns false when the rows belong to a conversation
    /// that is no longer open.
    pub fn replace_all(&mut self, conversation_id: &str, rows: Vec<Message>) -> bool {
        if !self.is_open(conversation_id) {
            return false;
        }
        let local: Vec<MessageEntry> = self
            .entries
            .drain(..)
            .filter(|e| e.is_pending() && !rows.iter().any(|row| e.correlates_with(row)))
            .collect();
        self.entries = rows
            .into_iter()
            .map(|message| MessageEntry {
                key: EntryKey::Confirmed { server_id: message.id.clone() },
                message,
            })
            .chain(local)
            .collect();
        self.sort();
        self.stale = false;
        true
    }

    /// `replace_all` for rows fetched when the store was at `generation`.
    /// An invalidation that landed while the fetch was in flight keeps the
    /// store stale so the next refresh picks it up.
    pub fn replace_all_as_of(&mut self, conversation_id: &str, rows: Vec<Message>, generation: u64) -> bool {
        if !self.replace_all(conversation_id, rows) {
            return false;
        }
        if self.generation != generation {
            self.stale = true;
        }
        true
    }

    /// Shows a message before the server has seen it.
    pub fn push_pending(&mut self, local_id: Uuid, message: Message) -> bool {
        if !self.is_open(&message.conversation_id) {
            return false;
        }
        self.entries.push(MessageEntry { key: EntryKey::Pending { local_id }, message });
        self.sort();
        true
    }

    fn pending_index(&self, local_id: Uuid) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key == EntryKey::Pending { local_id })
    }

    /// Applies the send call's answer to the optimistic entry. With a server
    /// row the entry becomes confirmed; with only a provider id it stays
    /// pending (status `sent`) until the row shows up.
    pub fn confirm(&mut self, local_id: Uuid, receipt: &SendReceipt) {
        let Some(idx) = self.pending_index(local_id) else {
            return;
        };
        match &receipt.message {
            Some(row) => {
                let already_there = self.entries.iter().any(|e| e.server_id() == Some(row.id.as_str()));
                if already_there {
                    self.entries.remove(idx);
                } else {
                    self.entries[idx] = MessageEntry {
                        key: EntryKey::Confirmed { server_id: row.id.clone() },
                        message: row.clone(),
                    };
                }
            }
            None => {
                let entry = &mut self.entries[idx];
                entry.message.status = MessageStatus::Sent;
                entry.message.provider_message_id = receipt.provider_message_id.clone();
            }
        }
        self.sort();
    }

    pub fn fail(&mut self, local_id: Uuid) {
        if let Some(idx) = self.pending_index(local_id) {
            self.entries[idx].message.status = MessageStatus::Failed;
        }
    }

    /// Merges a row pushed by the change feed. Rows already present by
    /// server id are merged instead of duplicated; rows matching a pending
    /// entry promote it. Returns true when a new entry was added.
    pub fn insert_remote(&mut self, row: Message) -> bool {
        if !self.is_open(&row.conversation_id) {
            return false;
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.server_id() == Some(row.id.as_str())) {
            if entry.message.status.can_become(row.status) {
                entry.message.status = row.status;
            }
            return false;
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.correlates_with(&row)) {
            debug!("pending message reconciled with {}", row.id);
            entry.key = EntryKey::Confirmed { server_id: row.id.clone() };
            entry.message = row;
            self.sort();
            return false;
        }
        self.entries.push(MessageEntry {
            key: EntryKey::Confirmed { server_id: row.id.clone() },
            message: row,
        });
        self.sort();
        true
    }

    /// Forward-only status transition for a confirmed message.
    pub fn update_status(&mut self, server_id: &str, status: MessageStatus) -> bool {
        match self.entries.iter_mut().find(|e| e.server_id() == Some(server_id)) {
            Some(entry) if entry.message.status.can_become(status) => {
                entry.message.status = status;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Direction, MessageType};
    use chrono::{Duration, TimeZone, Utc};

    fn row(id: &str, second: i64, status: MessageStatus) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            direction: Direction::Inbound,
            message_type: MessageType::Text,
            content: Some(id.into()),
            media_url: None,
            media_mime_type: None,
            media_caption: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(second),
            status,
            is_bot: false,
            provider_message_id: None,
            client_message_id: None,
        }
    }

    fn open_store() -> MessageStore {
        let mut store = MessageStore::new();
        store.select("c1");
        store
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.entries().iter().map(|e| e.message.id.clone()).collect()
    }

    #[test]
    fn replace_all_sorts_ascending() {
        let mut store = open_store();
        assert!(store.replace_all("c1", vec![row("b", 5, MessageStatus::Read), row("a", 1, MessageStatus::Read)]));
        assert_eq!(ids(&store), ["a", "b"]);
        assert!(!store.needs_refresh());
    }

    #[test]
    fn invalidation_during_fetch_keeps_store_stale() {
        let mut store = open_store();
        let generation = store.generation();
        store.invalidate();
        assert!(store.replace_all_as_of("c1", vec![row("a", 1, MessageStatus::Read)], generation));
        assert_eq!(ids(&store), ["a"]);
        assert!(store.needs_refresh());

        let generation = store.generation();
        assert!(store.replace_all_as_of("c1", vec![row("a", 1, MessageStatus::Read)], generation));
        assert!(!store.needs_refresh());
    }

    #[test]
    fn rows_for_another_conversation_are_ignored() {
        let mut store = open_store();
        assert!(!store.replace_all("c2", vec![row("x", 1, MessageStatus::Read)]));
        let mut other = row("y", 1, MessageStatus::Read);
        other.conversation_id = "c2".into();
        assert!(!store.insert_remote(other));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn realtime_redelivery_does_not_duplicate() {
        let mut store = open_store();
        let local_id = Uuid::new_v4();
        let mut optimistic = row("local", 10, MessageStatus::Sending);
        optimistic.direction = Direction::Outbound;
        store.push_pending(local_id, optimistic);

        let mut server = row("srv-1", 10, MessageStatus::Sent);
        server.client_message_id = Some(local_id.to_string());
        store.confirm(local_id, &SendReceipt { provider_message_id: Some("wamid.1".into()), message: Some(server.clone()) });
        assert_eq!(ids(&store), ["srv-1"]);

        assert!(!store.insert_remote(server.clone()));
        server.status = MessageStatus::Delivered;
        assert!(!store.insert_remote(server));
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()[0].message.status, MessageStatus::Delivered);
    }

    #[test]
    fn realtime_row_promotes_pending_by_provider_id() {
        let mut store = open_store();
        let local_id = Uuid::new_v4();
        store.push_pending(local_id, row("local", 10, MessageStatus::Sending));
        store.confirm(local_id, &SendReceipt { provider_message_id: Some("wamid.7".into()), message: None });
        assert!(store.entries()[0].is_pending());
        assert_eq!(store.entries()[0].message.status, MessageStatus::Sent);

        let mut pushed = row("srv-7", 11, MessageStatus::Sent);
        pushed.provider_message_id = Some("wamid.7".into());
        assert!(!store.insert_remote(pushed.clone()));
        assert_eq!(store.entries()[0].key, EntryKey::Confirmed { server_id: "srv-7".into() });

        assert!(!store.insert_remote(pushed));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn realtime_row_arriving_before_receipt() {
        let mut store = open_store();
        let local_id = Uuid::new_v4();
        store.push_pending(local_id, row("local", 10, MessageStatus::Sending));

        let mut pushed = row("srv-2", 10, MessageStatus::Sent);
        pushed.client_message_id = Some(local_id.to_string());
        store.insert_remote(pushed.clone());
        store.confirm(local_id, &SendReceipt { provider_message_id: None, message: Some(pushed) });
        assert_eq!(ids(&store), ["srv-2"]);
    }

    #[test]
    fn refetch_keeps_unknown_pending_and_drops_correlated() {
        let mut store = open_store();
        let kept = Uuid::new_v4();
        let sent = Uuid::new_v4();
        store.push_pending(kept, row("local-a", 20, MessageStatus::Sending));
        store.push_pending(sent, row("local-b", 21, MessageStatus::Sending));

        let mut confirmed = row("srv-b", 21, MessageStatus::Sent);
        confirmed.client_message_id = Some(sent.to_string());
        store.replace_all("c1", vec![row("old", 1, MessageStatus::Read), confirmed]);
        assert_eq!(ids(&store), ["old", "local-a", "srv-b"]);
    }

    #[test]
    fn failed_and_status_updates() {
        let mut store = open_store();
        let local_id = Uuid::new_v4();
        store.push_pending(local_id, row("local", 1, MessageStatus::Sending));
        store.fail(local_id);
        assert_eq!(store.entries()[0].message.status, MessageStatus::Failed);

        store.replace_all("c1", vec![row("m", 0, MessageStatus::Sent)]);
        assert!(store.update_status("m", MessageStatus::Read));
        assert!(!store.update_status("m", MessageStatus::Delivered));
    }
}
