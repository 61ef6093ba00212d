//! Outbound send pipeline and live inbox state for a WhatsApp CRM backend.

pub mod api;
pub mod bridge;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod inbox;
pub mod media;
pub mod orchestrator;
pub mod storage;
pub mod store;
pub mod utils;

pub use api::Backend;
pub use api::client::ApiClient;
pub use bridge::{PollSchedule, RealtimeBridge, Update};
pub use config::Config;
pub use cooldown::{ChannelKey, Clock, Cooldown, SystemClock};
pub use error::{ApiError, ConfigError, SendError, StorageError};
pub use inbox::Inbox;
pub use media::MediaPayload;
pub use orchestrator::{ComposeSlot, Notice, NoticeLevel, SendOrchestrator, SendOutcome, SendTarget};
