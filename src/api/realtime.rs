use crate::api::events::{FeedSignal, decode_frame, heartbeat_frame, join_frame};
use crate::error::ApiError;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

const HEARTBEAT_EVERY: Duration = Duration::from_secs(30);
const SIGNAL_BUFFER: usize = 256;

/// Websocket endpoint of the backend's change feed.
#[derive(Clone, Debug)]
pub struct RealtimeClient {
    ws_url: Url,
    access_token: Option<String>,
    heartbeat: Duration,
}

impl RealtimeClient {
    /// Derives the socket URL from the HTTP base (`https` becomes `wss`).
    /// `access_token` is the signed-in user's token; without it the feed
    /// only carries what the anonymous key may read.
    pub fn new(base_url: &Url, api_key: &str, access_token: Option<String>) -> Result<Self, ApiError> {
        let scheme = match base_url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(ApiError::Realtime(format!("unsupported scheme {other}"))),
        };
        let host = base_url
            .host_str()
            .ok_or_else(|| ApiError::Realtime("base url has no host".into()))?;
        let port = base_url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let mut ws_url = Url::parse(&format!("{scheme}://{host}{port}/realtime/v1/websocket"))
            .map_err(|e| ApiError::Realtime(e.to_string()))?;
        ws_url
            .query_pairs_mut()
            .append_pair("apikey", api_key)
            .append_pair("vsn", "1.0.0");
        Ok(Self { ws_url, access_token, heartbeat: HEARTBEAT_EVERY })
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub fn url(&self) -> &Url {
        &self.ws_url
    }

    /// Connects, joins the organization's channel and forwards every decoded
    /// signal until the socket closes. Drops are reported once as
    /// `FeedSignal::Closed` and are not retried here.
    pub async fn subscribe(&self, organization_id: &str) -> Result<Subscription, ApiError> {
        let (stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| ApiError::Realtime(e.to_string()))?;
        info!("realtime connected for organization {organization_id}");
        let (mut sink, mut source) = stream.split();

        let mut reference: u64 = 1;
        sink.send(WsMessage::Text(join_frame(organization_id, self.access_token.as_deref(), reference)))
            .await
            .map_err(|e| ApiError::Realtime(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let every = self.heartbeat;
        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(every);
            heartbeat.tick().await;
            let reason = loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        reference += 1;
                        if let Err(e) = sink.send(WsMessage::Text(heartbeat_frame(reference))).await {
                            break format!("heartbeat failed: {e}");
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(signal) = decode_frame(&text) {
                                let closed = matches!(signal, FeedSignal::Closed(_));
                                if tx.send(signal).await.is_err() {
                                    debug!("realtime receiver dropped");
                                    return;
                                }
                                if closed {
                                    return;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = sink.send(WsMessage::Pong(payload)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break "socket closed".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                    }
                }
            };
            warn!("realtime subscription dropped: {reason}");
            let _ = tx.send(FeedSignal::Closed(reason)).await;
        });

        Ok(Subscription { signals: rx, guard: SocketGuard(task) })
    }
}

/// Live change-feed subscription. The socket stays open while `guard` lives.
pub struct Subscription {
    pub signals: mpsc::Receiver<FeedSignal>,
    pub guard: SocketGuard,
}

/// Aborts the socket task when dropped.
pub struct SocketGuard(JoinHandle<()>);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_follows_base_scheme() {
        let base = Url::parse("https://abc.backend.test").unwrap();
        let client = RealtimeClient::new(&base, "anon", None).unwrap();
        assert_eq!(client.url().as_str(), "wss://abc.backend.test/realtime/v1/websocket?apikey=anon&vsn=1.0.0");

        let local = Url::parse("http://127.0.0.1:54321/").unwrap();
        let client = RealtimeClient::new(&local, "k", None).unwrap();
        assert_eq!(client.url().scheme(), "ws");
        assert_eq!(client.url().port(), Some(54321));
    }

    #[test]
    fn rejects_non_http_base() {
        let base = Url::parse("ftp://files.test").unwrap();
        assert!(RealtimeClient::new(&base, "k", None).is_err());
    }

    #[tokio::test]
    async fn subscribe_joins_with_token_beats_and_reports_drop() {
        use tokio::net::TcpListener;
        use tokio::time::timeout;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let Some(Ok(WsMessage::Text(join))) = ws.next().await else { panic!("expected join") };
            let join: serde_json::Value = serde_json::from_str(&join).unwrap();
            ws.send(WsMessage::Text(
                r#"{"topic":"realtime:inbox:org-1","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#
                    .to_string(),
            ))
            .await
            .unwrap();

            let Some(Ok(WsMessage::Text(beat))) = ws.next().await else { panic!("expected heartbeat") };
            let beat: serde_json::Value = serde_json::from_str(&beat).unwrap();
            ws.close(None).await.unwrap();
            (join, beat)
        });

        let base = Url::parse(&format!("http://{addr}")).unwrap();
        let client = RealtimeClient::new(&base, "anon", Some("user-jwt".into()))
            .unwrap()
            .with_heartbeat(Duration::from_millis(50));
        let mut sub = client.subscribe("org-1").await.unwrap();

        let first = timeout(Duration::from_secs(5), sub.signals.recv()).await.unwrap();
        assert_eq!(first, Some(FeedSignal::Alive));
        let last = timeout(Duration::from_secs(5), sub.signals.recv()).await.unwrap();
        assert!(matches!(last, Some(FeedSignal::Closed(_))));

        let (join, beat) = server.await.unwrap();
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["topic"], "realtime:inbox:org-1");
        assert_eq!(join["payload"]["access_token"], "user-jwt");
        assert_eq!(beat["event"], "heartbeat");
        assert_eq!(beat["topic"], "phoenix");
    }
}
