use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum spacing between two outbound sends on the same channel.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(5000);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A channel is one messaging instance of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub organization_id: String,
    pub instance_id: String,
}

impl ChannelKey {
    pub fn new(organization_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self { organization_id: organization_id.into(), instance_id: instance_id.into() }
    }
}

/// Last accepted send per channel, shared by the text, image and audio
/// paths. Process-local: two processes each keep their own window.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    last: Mutex<HashMap<ChannelKey, Instant>>,
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: Mutex::new(HashMap::new()) }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `Err(remaining)` while the window since the last send is still open.
    /// Exactly at the window boundary the send is allowed.
    pub async fn check(&self, key: &ChannelKey, now: Instant) -> Result<(), Duration> {
        let last = self.last.lock().await;
        match last.get(key) {
            Some(at) => {
                let elapsed = now.saturating_duration_since(*at);
                if elapsed >= self.window {
                    Ok(())
                } else {
                    Err(self.window - elapsed)
                }
            }
            None => Ok(()),
        }
    }

    pub async fn record(&self, key: &ChannelKey, now: Instant) {
        self.last.lock().await.insert(key.clone(), now);
    }
}
