use crate::api::Backend;
use crate::api::models::{
    Conversation, CreateUploadUrlRequest, Direction, MediaKind, Message, MessageStatus, MessageType,
    SendMessageRequest, SendReceipt,
};
use crate::cooldown::{ChannelKey, Clock, Cooldown, SystemClock};
use crate::error::SendError;
use crate::inbox::Inbox;
use crate::media::MediaPayload;
use chrono::Utc;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Where a compose slot delivers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTarget {
    pub organization_id: String,
    pub conversation_id: String,
    pub instance_id: String,
    pub chat_id: Option<String>,
    pub phone: String,
}

impl SendTarget {
    pub fn for_conversation(
        organization_id: &str,
        conversation: &Conversation,
        fallback_instance: Option<&str>,
    ) -> Result<Self, SendError> {
        let instance_id = conversation
            .instance_id
            .as_deref()
            .or(fallback_instance)
            .ok_or(SendError::MissingInstance)?;
        Ok(Self {
            organization_id: organization_id.to_string(),
            conversation_id: conversation.id.clone(),
            instance_id: instance_id.to_string(),
            chat_id: conversation.chat_id.clone(),
            phone: conversation.phone.clone(),
        })
    }

    fn channel(&self) -> ChannelKey {
        ChannelKey::new(&self.organization_id, &self.instance_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Composing,
    Uploading,
    Sending,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Uploading,
            2 => Phase::Sending,
            _ => Phase::Composing,
        }
    }
}

#[derive(Debug, Default)]
struct Draft {
    text: String,
    media: Option<MediaPayload>,
}

/// Compose state of one conversation: typed text, pending media and the
/// in-flight gate. Everything here survives a failed send.
#[derive(Debug)]
pub struct ComposeSlot {
    target: SendTarget,
    draft: Mutex<Draft>,
    in_flight: AtomicBool,
    phase: AtomicU8,
}

/// Held while a send runs; releasing it reopens the slot.
struct InFlight<'a>(&'a ComposeSlot);

impl InFlight<'_> {
    fn phase(&self, phase: Phase) {
        self.0.phase.store(phase as u8, Ordering::SeqCst);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.phase.store(Phase::Composing as u8, Ordering::SeqCst);
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl ComposeSlot {
    pub fn new(target: SendTarget) -> Self {
        Self {
            target,
            draft: Mutex::new(Draft::default()),
            in_flight: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::Composing as u8),
        }
    }

    pub fn target(&self) -> &SendTarget {
        &self.target
    }

    pub async fn set_text(&self, text: impl Into<String>) {
        self.draft.lock().await.text = text.into();
    }

    pub async fn text(&self) -> String {
        self.draft.lock().await.text.clone()
    }

    pub async fn attach(&self, media: MediaPayload) {
        self.draft.lock().await.media = Some(media);
    }

    /// Packages a recorder data URL and keeps it as the pending media.
    pub async fn attach_data_url(&self, kind: MediaKind, data_url: &str) -> Result<(), SendError> {
        let media = MediaPayload::from_data_url(kind, data_url)?;
        self.attach(media).await;
        Ok(())
    }

    pub async fn attach_file(&self, kind: MediaKind, path: &Path) -> Result<(), SendError> {
        let media = MediaPayload::from_file(kind, path, None).await?;
        self.attach(media).await;
        Ok(())
    }

    pub async fn pending_media(&self) -> Option<MediaPayload> {
        self.draft.lock().await.media.clone()
    }

    pub async fn discard_media(&self) {
        self.draft.lock().await.media = None;
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<InFlight<'_>, SendError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| InFlight(self))
            .map_err(|_| SendError::Busy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send; no network call was made.
    Skipped,
    Sent { local_id: Uuid, receipt: SendReceipt },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient, user-facing message produced at the send boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl From<&SendError> for Notice {
    fn from(e: &SendError) -> Self {
        let level = if e.is_informational() { NoticeLevel::Info } else { NoticeLevel::Error };
        Notice { level, text: e.to_string() }
    }
}

/// Runs one user send at a time per slot: cooldown, optional upload, the
/// remote send, then reconciliation with the message store.
pub struct SendOrchestrator {
    inbox: Arc<Inbox>,
    cooldown: Arc<Cooldown>,
    clock: Arc<dyn Clock>,
}

impl SendOrchestrator {
    pub fn new(inbox: Arc<Inbox>, cooldown: Arc<Cooldown>) -> Self {
        Self { inbox, cooldown, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn backend(&self) -> &Arc<dyn Backend> {
        self.inbox.backend()
    }

    /// Opens a compose slot for a known conversation.
    pub async fn slot_for(&self, conversation_id: &str) -> Option<Result<ComposeSlot, SendError>> {
        let conversation = self.inbox.conversation(conversation_id).await?;
        Some(
            SendTarget::for_conversation(self.inbox.organization_id(), &conversation, self.inbox.default_instance())
                .map(ComposeSlot::new),
        )
    }

    async fn check_cooldown(&self, target: &SendTarget) -> Result<(), SendError> {
        self.cooldown
            .check(&target.channel(), self.clock.now())
            .await
            .map_err(|remaining| {
                warn!("send to {} blocked by cooldown ({remaining:?} left)", target.conversation_id);
                SendError::CooldownActive { remaining }
            })
    }

    fn optimistic(target: &SendTarget, message_type: MessageType, content: Option<String>, media: Option<&MediaPayload>, local_id: Uuid) -> Message {
        Message {
            id: local_id.to_string(),
            conversation_id: target.conversation_id.clone(),
            direction: Direction::Outbound,
            message_type,
            media_caption: media.and(content.clone()),
            content,
            media_url: None,
            media_mime_type: media.map(|m| m.mime_type.clone()),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
            is_bot: false,
            provider_message_id: None,
            client_message_id: Some(local_id.to_string()),
        }
    }

    /// The only step that persists anything server-side.
    async fn deliver(&self, target: &SendTarget, local_id: Uuid, request: SendMessageRequest, optimistic: Message) -> Result<SendReceipt, SendError> {
        self.inbox.messages().await.push_pending(local_id, optimistic);
        match self.backend().send_message(&request).await {
            Ok(receipt) => {
                self.cooldown.record(&target.channel(), self.clock.now()).await;
                self.inbox.messages().await.confirm(local_id, &receipt);
                self.inbox.invalidate_all().await;
                info!(
                    "sent {} to {} (provider id {:?})",
                    request.message_type.as_str(),
                    target.conversation_id,
                    receipt.provider_message_id
                );
                Ok(receipt)
            }
            Err(e) => {
                self.inbox.messages().await.fail(local_id);
                warn!("send to {} failed: {e}", target.conversation_id);
                Err(SendError::from_send(e))
            }
        }
    }

    pub async fn send_text(&self, slot: &ComposeSlot) -> Result<SendOutcome, SendError> {
        let typed = slot.text().await;
        let text = typed.trim().to_string();
        if text.is_empty() {
            return Ok(SendOutcome::Skipped);
        }
        let flight = slot.begin()?;
        let target = slot.target();
        self.check_cooldown(target).await?;

        flight.phase(Phase::Sending);
        let local_id = Uuid::new_v4();
        let request = SendMessageRequest {
            organization_id: target.organization_id.clone(),
            conversation_id: target.conversation_id.clone(),
            instance_id: target.instance_id.clone(),
            chat_id: target.chat_id.clone(),
            phone: target.phone.clone(),
            content: text.clone(),
            message_type: MessageType::Text,
            media_storage_path: None,
            media_mime_type: None,
            media_caption: None,
            client_message_id: local_id.to_string(),
        };
        let optimistic = Self::optimistic(target, MessageType::Text, Some(text), None, local_id);
        let receipt = self.deliver(target, local_id, request, optimistic).await?;
        // Text typed while the send was in flight stays.
        let mut draft = slot.draft.lock().await;
        if draft.text == typed {
            draft.text.clear();
        }
        Ok(SendOutcome::Sent { local_id, receipt })
    }

    /// Sends the slot's pending image or audio, using the typed text as caption.
    pub async fn send_media(&self, slot: &ComposeSlot) -> Result<SendOutcome, SendError> {
        let Some(media) = slot.pending_media().await else {
            return Ok(SendOutcome::Skipped);
        };
        let flight = slot.begin()?;
        let target = slot.target();
        self.check_cooldown(target).await?;

        let typed = slot.text().await;
        let caption = Some(typed.trim().to_string()).filter(|c| !c.is_empty());

        flight.phase(Phase::Uploading);
        let upload_request = CreateUploadUrlRequest {
            organization_id: target.organization_id.clone(),
            conversation_id: target.conversation_id.clone(),
            mime_type: media.mime_type.clone(),
            kind: media.kind,
        };
        let upload = self
            .backend()
            .create_upload_url(&upload_request)
            .await
            .map_err(SendError::from_upload_url)?;
        debug!("uploading {} bytes to {}", media.bytes.len(), upload.path);
        self.backend()
            .upload(&upload, &media.mime_type, media.bytes.clone())
            .await
            .map_err(SendError::from_upload)?;

        flight.phase(Phase::Sending);
        let local_id = Uuid::new_v4();
        let message_type = media.kind.message_type();
        let request = SendMessageRequest {
            organization_id: target.organization_id.clone(),
            conversation_id: target.conversation_id.clone(),
            instance_id: target.instance_id.clone(),
            chat_id: target.chat_id.clone(),
            phone: target.phone.clone(),
            content: caption.clone().unwrap_or_default(),
            message_type,
            media_storage_path: Some(upload.path.clone()),
            media_mime_type: Some(media.mime_type.clone()),
            media_caption: caption.clone(),
            client_message_id: local_id.to_string(),
        };
        let optimistic = Self::optimistic(target, message_type, caption.clone(), Some(&media), local_id);
        let receipt = self.deliver(target, local_id, request, optimistic).await?;

        let mut draft = slot.draft.lock().await;
        if draft.media.as_ref() == Some(&media) {
            draft.media = None;
        }
        if caption.is_some() && draft.text == typed {
            draft.text.clear();
        }
        Ok(SendOutcome::Sent { local_id, receipt })
    }

    /// Send-button handler: picks the media or text path and turns any
    /// failure into a notice. The slot keeps its contents on failure.
    pub async fn submit(&self, slot: &ComposeSlot) -> Result<SendOutcome, Notice> {
        let result = if slot.pending_media().await.is_some() {
            self.send_media(slot).await
        } else {
            self.send_text(slot).await
        };
        result.map_err(|e| Notice::from(&e))
    }
}
