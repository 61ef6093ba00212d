use crate::api::models::Conversation;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Client-side cache of an organization's conversation list.
#[derive(Debug, Default)]
pub struct ConversationStore {
    items: Vec<Conversation>,
    stale: bool,
    loaded: bool,
    generation: u64,
}

/// Newest activity first; conversations that never had a message go last.
pub fn by_last_activity(a: &Conversation, b: &Conversation) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache with an authoritative fetch. Rows for the same
    /// (organization, phone) pair collapse into the most recently active one.
    pub fn replace_all(&mut self, rows: Vec<Conversation>) {
        let mut by_counterpart: HashMap<(String, String), Conversation> = HashMap::new();
        for row in rows {
            let key = (row.organization_id.clone(), row.phone.clone());
            match by_counterpart.get(&key) {
                Some(existing) if by_last_activity(existing, &row) != Ordering::Greater => {}
                _ => {
                    by_counterpart.insert(key, row);
                }
            }
        }
        self.items = by_counterpart.into_values().collect();
        self.items.sort_by(by_last_activity);
        self.stale = false;
        self.loaded = true;
    }

    /// `replace_all` for rows fetched when the store was at `generation`;
    /// stays stale if it was invalidated in the meantime.
    pub fn replace_all_as_of(&mut self, rows: Vec<Conversation>, generation: u64) {
        self.replace_all(rows);
        if self.generation != generation {
            self.stale = true;
        }
    }

    pub fn list(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when nothing was loaded yet or the cache was invalidated.
    pub fn needs_refresh(&self) -> bool {
        self.stale || !self.loaded
    }

    /// Local echo of opening a conversation; the next refetch is authoritative.
    pub fn mark_read(&mut self, id: &str) {
        if let Some(conv) = self.items.iter_mut().find(|c| c.id == id) {
            conv.unread_count = 0;
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn conv(id: &str, phone: &str, minute: Option<u32>) -> Conversation {
        Conversation {
            id: id.into(),
            organization_id: "org-1".into(),
            phone: phone.into(),
            chat_id: None,
            display_name: None,
            last_message_at: minute.map(|m| Utc.with_ymd_and_hms(2026, 3, 1, 12, m, 0).unwrap()),
            last_message_preview: None,
            unread_count: 1,
            lead_id: None,
            instance_id: Some("inst-1".into()),
            is_group: false,
        }
    }

    #[test]
    fn orders_by_last_message_desc_with_nulls_last() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![
            conv("a", "1", None),
            conv("b", "2", Some(5)),
            conv("c", "3", Some(30)),
            conv("d", "4", None),
            conv("e", "5", Some(10)),
        ]);
        let ids: Vec<_> = store.list().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c", "e", "b", "a", "d"]);
    }

    #[test]
    fn one_conversation_per_counterpart() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![conv("old", "555", Some(1)), conv("new", "555", Some(9))]);
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].id, "new");
    }

    #[test]
    fn invalidate_and_mark_read() {
        let mut store = ConversationStore::new();
        assert!(store.needs_refresh());
        store.replace_all(vec![conv("a", "1", Some(1)), conv("b", "2", Some(2))]);
        assert!(!store.needs_refresh());
        assert_eq!(store.total_unread(), 2);

        store.mark_read("a");
        assert_eq!(store.get("a").unwrap().unread_count, 0);
        store.invalidate();
        assert!(store.needs_refresh());
    }

    #[test]
    fn invalidation_during_fetch_keeps_list_stale() {
        let mut store = ConversationStore::new();
        let generation = store.generation();
        store.invalidate();
        store.replace_all_as_of(vec![conv("a", "1", Some(1))], generation);
        assert_eq!(store.list().len(), 1);
        assert!(store.needs_refresh());

        let generation = store.generation();
        store.replace_all_as_of(vec![conv("a", "1", Some(1))], generation);
        assert!(!store.needs_refresh());
    }
}
