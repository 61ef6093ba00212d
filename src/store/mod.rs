pub mod conversations;
pub mod messages;

pub use conversations::ConversationStore;
pub use messages::{EntryKey, MessageEntry, MessageStore};
