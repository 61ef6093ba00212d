pub mod client;
pub mod events;
pub mod models;
pub mod realtime;

#[cfg(test)]
pub(crate) mod fake;

use crate::error::ApiError;
use async_trait::async_trait;
use models::{
    Conversation, CreateUploadUrlRequest, Instance, Message, SendMessageRequest, SendReceipt,
    UploadTarget,
};

/// Remote operations the inbox relies on. `client::ApiClient` talks to the
/// real backend; tests swap in an in-memory fake.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_upload_url(&self, req: &CreateUploadUrlRequest) -> Result<UploadTarget, ApiError>;

    /// Body-only PUT of `bytes` to a signed destination. Any non-2xx status is an error.
    async fn upload(&self, target: &UploadTarget, mime_type: &str, bytes: Vec<u8>) -> Result<(), ApiError>;

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendReceipt, ApiError>;

    async fn list_conversations(
        &self,
        organization_id: &str,
        instance_id: Option<&str>,
    ) -> Result<Vec<Conversation>, ApiError>;

    /// Newest `limit` messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, ApiError>;

    async fn list_instances(&self, organization_id: &str) -> Result<Vec<Instance>, ApiError>;

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError>;
}
