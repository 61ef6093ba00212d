use crate::api::events::{ChangeEvent, ChangeKind, FeedSignal};
use crate::api::models::{Message, MessageStatus};
use crate::inbox::Inbox;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Push counts as stalled when nothing arrived for this long. Two missed
/// heartbeat replies plus slack.
pub const PUSH_STALL_AFTER: Duration = Duration::from_secs(75);

/// Interval of the polling backstop. Polls at `base` while push looks
/// stalled and doubles up to `max` while push is healthy.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    max: Duration,
    stall_after: Duration,
    current: Duration,
    last_push: Option<Instant>,
}

impl PollSchedule {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            stall_after: PUSH_STALL_AFTER,
            current: base,
            last_push: None,
        }
    }

    pub fn with_stall_after(mut self, stall_after: Duration) -> Self {
        self.stall_after = stall_after;
        self
    }

    pub fn on_push(&mut self, now: Instant) {
        self.last_push = Some(now);
    }

    pub fn push_healthy(&self, now: Instant) -> bool {
        self.last_push
            .is_some_and(|at| now.saturating_duration_since(at) <= self.stall_after)
    }

    /// Delay until the next poll.
    pub fn next_interval(&mut self, now: Instant) -> Duration {
        if self.push_healthy(now) {
            self.current = (self.current * 2).min(self.max);
        } else {
            self.current = self.base;
        }
        self.current
    }
}

/// What a change did to the local stores, for anyone watching.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Appended(Message),
    StatusChanged { message_id: String, status: MessageStatus },
    ConversationsChanged,
    MessagesChanged,
}

/// Applies change-feed events to the inbox stores and keeps them fresh with
/// a polling backstop when push goes quiet.
pub struct RealtimeBridge {
    inbox: Arc<Inbox>,
    schedule: PollSchedule,
    updates: Option<mpsc::UnboundedSender<Update>>,
}

impl RealtimeBridge {
    pub fn new(inbox: Arc<Inbox>, schedule: PollSchedule) -> Self {
        Self { inbox, schedule, updates: None }
    }

    pub fn subscribe_updates(&mut self) -> mpsc::UnboundedReceiver<Update> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    fn emit(&self, update: Update) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }

    /// Applies one event. Conversation changes always invalidate; message
    /// inserts for the open conversation are appended right away and status
    /// updates only move forward. Message events still invalidate the
    /// message store so the next refetch settles the history.
    pub async fn handle(&self, event: ChangeEvent) -> Update {
        if event.is_conversation() {
            self.inbox.invalidate_conversations().await;
            return Update::ConversationsChanged;
        }
        let update = match (event.kind, event.message()) {
            (ChangeKind::Insert, Some(row)) => {
                let appended = self.inbox.messages().await.insert_remote(row.clone());
                if appended {
                    Update::Appended(row)
                } else {
                    Update::MessagesChanged
                }
            }
            (ChangeKind::Update, Some(row)) => {
                if self.inbox.messages().await.update_status(&row.id, row.status) {
                    Update::StatusChanged { message_id: row.id, status: row.status }
                } else {
                    Update::MessagesChanged
                }
            }
            _ => Update::MessagesChanged,
        };
        if event.is_message() {
            self.inbox.invalidate_messages().await;
        }
        update
    }

    /// Refetches both the conversation list and the open conversation's
    /// messages. A failure in one does not skip the other.
    async fn poll(&self) {
        debug!("polling backstop");
        if let Err(e) = self.inbox.refresh_conversations().await {
            warn!("conversation poll failed: {e}");
        }
        if let Err(e) = self.inbox.refresh_messages().await {
            warn!("message poll failed: {e}");
        }
    }

    async fn refresh(&self) {
        if let Err(e) = self.inbox.refresh_stale().await {
            warn!("refresh after invalidation failed: {e}");
        }
    }

    /// Runs until `shutdown` resolves. `signals` may be absent or close at
    /// any point; polling carries on alone in that case.
    pub async fn run<F>(mut self, signals: Option<mpsc::Receiver<FeedSignal>>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut signals = signals;
        let poll = tokio::time::sleep(self.schedule.next_interval(Instant::now()));
        tokio::pin!(poll);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                signal = next_signal(&mut signals) => match signal {
                    Some(FeedSignal::Change(event)) => {
                        self.schedule.on_push(Instant::now());
                        let update = self.handle(event).await;
                        self.emit(update);
                    }
                    Some(FeedSignal::Alive) => self.schedule.on_push(Instant::now()),
                    Some(FeedSignal::Closed(reason)) => {
                        warn!("change feed closed ({reason}); polling only");
                        signals = None;
                    }
                    None => {
                        warn!("change feed ended; polling only");
                        signals = None;
                    }
                },
                _ = self.inbox.invalidated() => self.refresh().await,
                _ = &mut poll => {
                    self.poll().await;
                    let now = Instant::now();
                    poll.as_mut().reset(now + self.schedule.next_interval(now));
                }
            }
        }
        info!("realtime bridge stopped");
    }
}

async fn next_signal(signals: &mut Option<mpsc::Receiver<FeedSignal>>) -> Option<FeedSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
