use crate::api::models::Message;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const MESSAGES_TABLE: &str = "whatsapp_messages";
pub const CONVERSATIONS_TABLE: &str = "whatsapp_conversations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    #[serde(other)]
    Other,
}

/// A row change pushed by the backend's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type", alias = "eventType")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default, alias = "new")]
    pub record: Value,
}

impl ChangeEvent {
    pub fn is_message(&self) -> bool {
        self.table == MESSAGES_TABLE
    }

    pub fn is_conversation(&self) -> bool {
        self.table == CONVERSATIONS_TABLE
    }

    /// The pushed row as a message, when it is one and it decodes.
    pub fn message(&self) -> Option<Message> {
        if !self.is_message() {
            return None;
        }
        match serde_json::from_value(self.record.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                debug!("undecodable message row: {e}");
                None
            }
        }
    }
}

/// What the realtime socket tells the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Change(ChangeEvent),
    /// Any sign of life from the server (join or heartbeat reply).
    Alive,
    Closed(String),
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Decodes one text frame from the realtime socket. Frames the inbox does
/// not care about yield `None`.
pub fn decode_frame(text: &str) -> Option<FeedSignal> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!("ignoring realtime frame: {e}");
            return None;
        }
    };
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?.clone();
            serde_json::from_value::<ChangeEvent>(data).ok().map(FeedSignal::Change)
        }
        "phx_reply" => {
            let ok = frame.payload.get("status").and_then(Value::as_str) == Some("ok");
            if ok {
                Some(FeedSignal::Alive)
            } else {
                Some(FeedSignal::Closed(frame.payload.to_string()))
            }
        }
        "phx_error" | "phx_close" => Some(FeedSignal::Closed(frame.event)),
        _ => None,
    }
}

pub(crate) fn channel_topic(organization_id: &str) -> String {
    format!("realtime:inbox:{organization_id}")
}

/// Join request subscribing to message inserts/updates and conversation
/// inserts/updates of one organization. The user's token goes along so row
/// policies apply to the feed the same way they do to queries.
pub(crate) fn join_frame(organization_id: &str, access_token: Option<&str>, reference: u64) -> String {
    let filter = format!("organization_id=eq.{organization_id}");
    let mut payload = json!({
        "config": {
            "postgres_changes": [
                { "event": "INSERT", "schema": "public", "table": MESSAGES_TABLE, "filter": filter },
                { "event": "UPDATE", "schema": "public", "table": MESSAGES_TABLE, "filter": filter },
                { "event": "INSERT", "schema": "public", "table": CONVERSATIONS_TABLE, "filter": filter },
                { "event": "UPDATE", "schema": "public", "table": CONVERSATIONS_TABLE, "filter": filter },
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    json!({
        "topic": channel_topic(organization_id),
        "event": "phx_join",
        "payload": payload,
        "ref": reference.to_string(),
    })
    .to_string()
}

pub(crate) fn heartbeat_frame(reference: u64) -> String {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": reference.to_string() }).to_string()
}
