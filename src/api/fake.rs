use crate::api::Backend;
use crate::api::models::{
    Conversation, CreateUploadUrlRequest, Instance, Message, SendMessageRequest, SendReceipt,
    UploadTarget,
};
use crate::error::ApiError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// One remote call as seen by the fake, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateUploadUrl(CreateUploadUrlRequest),
    Upload { url: String, mime_type: String, len: usize },
    Send(SendMessageRequest),
    ListConversations,
    ListMessages(String),
    ListInstances,
    MarkRead(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    upload_urls: VecDeque<Result<UploadTarget, ApiError>>,
    uploads: VecDeque<Result<(), ApiError>>,
    sends: VecDeque<Result<SendReceipt, ApiError>>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    send_gate: Option<Arc<Notify>>,
}

/// In-memory backend that records calls and replays scripted results.
/// Unscripted calls succeed with a plausible default.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Calls that belong to the send pipeline, ignoring list/refresh traffic.
    pub async fn send_calls(&self) -> Vec<Call> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, Call::CreateUploadUrl(_) | Call::Upload { .. } | Call::Send(_)))
            .collect()
    }

    pub async fn script_upload_url(&self, result: Result<UploadTarget, ApiError>) {
        self.state.lock().await.upload_urls.push_back(result);
    }

    pub async fn script_upload(&self, result: Result<(), ApiError>) {
        self.state.lock().await.uploads.push_back(result);
    }

    pub async fn script_send(&self, result: Result<SendReceipt, ApiError>) {
        self.state.lock().await.sends.push_back(result);
    }

    /// Makes every later send wait, after being recorded, until the
    /// returned gate is notified once per send.
    pub async fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().await.send_gate = Some(gate.clone());
        gate
    }

    pub async fn set_conversations(&self, rows: Vec<Conversation>) {
        self.state.lock().await.conversations = rows;
    }

    pub async fn set_messages(&self, rows: Vec<Message>) {
        self.state.lock().await.messages = rows;
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_upload_url(&self, req: &CreateUploadUrlRequest) -> Result<UploadTarget, ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::CreateUploadUrl(req.clone()));
        state.upload_urls.pop_front().unwrap_or_else(|| {
            Ok(UploadTarget {
                signed_url: format!("https://storage.test/upload/{}", req.conversation_id),
                path: format!("{}/{}/media", req.organization_id, req.conversation_id),
            })
        })
    }

    async fn upload(&self, target: &UploadTarget, mime_type: &str, bytes: Vec<u8>) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::Upload {
            url: target.signed_url.clone(),
            mime_type: mime_type.to_string(),
            len: bytes.len(),
        });
        state.uploads.pop_front().unwrap_or(Ok(()))
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendReceipt, ApiError> {
        let gate = {
            let mut state = self.state.lock().await;
            state.calls.push(Call::Send(req.clone()));
            state.send_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state.lock().await.sends.pop_front().unwrap_or_else(|| {
            Ok(SendReceipt { provider_message_id: Some(format!("wamid.{}", req.client_message_id)), message: None })
        })
    }

    async fn list_conversations(&self, _organization_id: &str, _instance_id: Option<&str>) -> Result<Vec<Conversation>, ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::ListConversations);
        Ok(state.conversations.clone())
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::ListMessages(conversation_id.to_string()));
        let rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.into_iter().skip(skip).collect())
    }

    async fn list_instances(&self, _organization_id: &str) -> Result<Vec<Instance>, ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::ListInstances);
        Ok(vec![Instance { id: "inst-1".into(), display_name: "Vendas".into(), is_connected: true }])
    }

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::MarkRead(conversation_id.to_string()));
        Ok(())
    }
}
