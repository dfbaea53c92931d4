//! Mazu hub: the single live push connection to the service.
//!
//! One `Channel` owns at most one websocket session. Frames are decoded into
//! [`PushEvent`]s and handed to the handler given to `connect`; undecodable
//! frames are dropped. When the socket closes the session sleeps a fixed delay
//! and dials again with the same handler until `disconnect` is called.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use mazu_core::{ErrorFrame, PushEvent};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Connection parameters. `url` may be the service base (`http://host:port`)
/// or an explicit websocket endpoint (`ws://host:port/ws`).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub client: String,
    pub user: Option<String>,
    /// Bearer identity for the credentialed variant.
    pub token: Option<String>,
    /// Optional server-side event filter.
    pub events: Vec<String>,
    pub reconnect_delay: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>, client: impl Into<String>) -> Self {
        Self { url: url.into(), client: client.into(), user: None, token: None, events: Vec::new(), reconnect_delay: DEFAULT_RECONNECT_DELAY }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self { self.token = token; self }

    pub fn with_user(mut self, user: Option<String>) -> Self { self.user = user; self }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self { self.reconnect_delay = delay; self }

    /// Resolve the websocket URL including the identity query parameters.
    pub fn ws_url(&self) -> Result<Url, HubError> {
        let mut url = Url::parse(&self.url).map_err(|e| HubError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(HubError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme).map_err(|_| HubError::UnsupportedScheme(scheme.to_string()))?;
        if url.path() == "/" || url.path().is_empty() {
            url.set_path("/ws");
        }
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("client", &self.client);
            if let Some(user) = &self.user {
                q.append_pair("user", user);
            }
            if let Some(token) = &self.token {
                q.append_pair("token", token);
            }
            if !self.events.is_empty() {
                q.append_pair("events", &self.events.join(","));
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

pub type EventHandler = Arc<dyn Fn(PushEvent) + Send + Sync>;
pub type AuthFailureHandler = Arc<dyn Fn(ErrorFrame) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    AuthFailed,
}

/// Owned handle to the push session.
pub struct Channel {
    cfg: Mutex<ChannelConfig>,
    on_auth_failure: Option<AuthFailureHandler>,
    task: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ChannelState>,
}

impl Channel {
    pub fn new(cfg: ChannelConfig) -> Arc<Self> { Self::build(cfg, None) }

    /// Credentialed variant: an `error` frame clears the token, calls
    /// `on_auth_failure` and ends the session without reconnecting.
    pub fn with_auth_failure(cfg: ChannelConfig, on_auth_failure: AuthFailureHandler) -> Arc<Self> {
        Self::build(cfg, Some(on_auth_failure))
    }

    fn build(cfg: ChannelConfig, on_auth_failure: Option<AuthFailureHandler>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Arc::new(Self { cfg: Mutex::new(cfg), on_auth_failure, task: Mutex::new(None), state_tx })
    }

    pub fn state(&self) -> ChannelState { *self.state_tx.borrow() }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> { self.state_tx.subscribe() }

    pub fn config(&self) -> ChannelConfig { self.cfg.lock().unwrap_or_else(PoisonError::into_inner).clone() }

    /// Replace credentials; takes effect on the next dial.
    pub fn set_token(&self, token: Option<String>) {
        self.cfg.lock().unwrap_or_else(PoisonError::into_inner).token = token;
    }

    /// Whether a session task (connected, dialing or waiting to redial) exists.
    pub fn is_active(&self) -> bool {
        let guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Start the session. No-op while one is already running.
    pub fn connect(self: &Arc<Self>, handler: EventHandler) {
        let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!("hub: connect ignored; session already active");
            return;
        }
        let me = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { me.run(handler).await }));
    }

    /// Cancel any pending redial and drop the live socket.
    pub fn disconnect(&self) {
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(h) = handle {
            h.abort();
            info!("hub: disconnected");
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
    }

    async fn run(self: Arc<Self>, handler: EventHandler) {
        let session = Uuid::new_v4();
        let credentialed = self.config().token.is_some();
        loop {
            let cfg = self.config();
            if credentialed && cfg.token.is_none() {
                info!(%session, "hub: credentials cleared; not reconnecting");
                break;
            }
            let url = match cfg.ws_url() {
                Ok(u) => u,
                Err(e) => {
                    warn!(%session, error = %e, "hub: cannot build websocket url");
                    break;
                }
            };
            self.state_tx.send_replace(ChannelState::Connecting);
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    self.state_tx.send_replace(ChannelState::Connected);
                    info!(%session, client = %cfg.client, "hub: connected");
                    if self.pump(ws, &handler, credentialed).await == SessionEnd::AuthFailed {
                        break;
                    }
                    info!(%session, "hub: connection closed");
                }
                Err(e) => warn!(%session, error = %e, "hub: connect failed"),
            }
            self.state_tx.send_replace(ChannelState::Disconnected);
            counter!("hub_reconnects_total", 1u64);
            tokio::time::sleep(cfg.reconnect_delay).await;
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
    }

    async fn pump<S>(&self, mut ws: S, handler: &EventHandler, credentialed: bool) -> SessionEnd
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = ws.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        drop_frame("binary frame is not utf-8");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "hub: socket error");
                    break;
                }
            };
            counter!("hub_frames_total", 1u64);
            let event = match PushEvent::from_frame(&text) {
                Ok(ev) => ev,
                Err(e) => {
                    drop_frame(&e.to_string());
                    continue;
                }
            };
            if let PushEvent::Error(frame) = &event {
                if credentialed {
                    warn!(message = ?frame.message, "hub: server rejected credentials");
                    self.set_token(None);
                    if let Some(cb) = &self.on_auth_failure {
                        cb(frame.clone());
                    }
                    return SessionEnd::AuthFailed;
                }
            }
            handler(event);
        }
        SessionEnd::Closed
    }
}

fn drop_frame(reason: &str) {
    counter!("hub_frames_dropped_total", 1u64);
    debug!(reason, "hub: dropped undecodable frame");
}
