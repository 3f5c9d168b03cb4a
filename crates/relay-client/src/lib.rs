//! # relay-client
//!
//! Client-side notification agent for taskrelay.
//!
//! [`NotificationAgent`] is the single source of truth for a notification UI.
//! It reconciles two data sources into one consistent view:
//!
//! - a periodic poll of the notification gateway, which is authoritative and
//!   replaces the local cache wholesale, and
//! - the WebSocket push channel, which prepends new notifications as they
//!   arrive (deduplicated by id against anything a poll already delivered).
//!
//! The poll timer always runs regardless of channel state, so a total channel
//! outage never silences notifications — it only delays them up to one poll
//! interval. Channel drops degrade silently to poll-only mode and reconnect
//! with backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use relay_core::{
    ClientMessage, Error, MarkReadRequest, Notification, NotificationKind, NotificationList,
    Result, ServerMessage,
};

/// Hook for native popup delivery when a push notification arrives.
///
/// The embedding application decides what a "popup" is (OS notification
/// center, tray balloon, in-app toast). The default implementation only logs.
pub trait DesktopNotifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Default notifier: structured log line per push, no OS integration.
pub struct LogNotifier;

impl DesktopNotifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        tracing::info!(
            notification_id = %notification.id,
            title = %notification.title,
            message = %notification.message,
            "desktop notification"
        );
    }
}

/// Configuration for a [`NotificationAgent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Gateway base URL, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    /// Caller identity injected into every request (`x-user-email`).
    pub identity: String,
    /// Poll period for the authoritative re-fetch. Default: 30s.
    pub poll_interval: Duration,
    /// Per-request timeout for gateway calls. Default: 10s.
    pub request_timeout: Duration,
    /// Delay between push-channel reconnect attempts. Default: 2s.
    pub reconnect_backoff: Duration,
}

impl AgentConfig {
    pub fn new(base_url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity: identity.into(),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(2),
        }
    }

    fn list_url(&self) -> String {
        format!("{}/api/v1/notifications", self.base_url)
    }

    fn ws_url(&self) -> String {
        let base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/api/v1/ws", base)
    }
}

/// The reconciled local view.
#[derive(Default)]
struct View {
    notifications: Vec<Notification>,
    unread_count: usize,
}

struct Shared {
    view: RwLock<View>,
    connected: AtomicBool,
    notifier: Box<dyn DesktopNotifier>,
}

impl Shared {
    /// Poll result: server-authoritative, replaces the cache wholesale.
    fn replace(&self, list: NotificationList) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        view.notifications = list.notifications;
        view.unread_count = list.unread_count;
    }

    /// Push result: prepend (the list is newest-first) unless a poll already
    /// delivered this id, then fire the popup hook.
    fn apply_push(&self, notification: Notification) {
        {
            let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
            if view.notifications.iter().any(|n| n.id == notification.id) {
                return;
            }
            view.notifications.insert(0, notification.clone());
            view.unread_count += 1;
        }
        self.notifier.notify(&notification);
    }

    /// Optimistic local flip. Only an actual false → true transition
    /// decrements the counter, which is floored at zero regardless.
    fn mark_read_local(&self, id: Uuid) -> bool {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        match view.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                view.unread_count = view.unread_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    fn clear(&self) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        view.notifications.clear();
        view.unread_count = 0;
    }
}

/// Background agent reconciling gateway polls and channel pushes.
///
/// Spawn inside a tokio runtime. Dropping the agent (or calling
/// [`NotificationAgent::shutdown`]) stops the poll timer and closes the
/// channel task.
pub struct NotificationAgent {
    config: AgentConfig,
    http: reqwest::Client,
    shared: Arc<Shared>,
    refresh_tx: mpsc::UnboundedSender<()>,
    poll_task: JoinHandle<()>,
    channel_task: JoinHandle<()>,
}

impl NotificationAgent {
    /// Spawn with the default [`LogNotifier`].
    pub fn spawn(config: AgentConfig) -> Result<Self> {
        Self::spawn_with_notifier(config, Box::new(LogNotifier))
    }

    /// Spawn with a custom popup hook.
    pub fn spawn_with_notifier(
        config: AgentConfig,
        notifier: Box<dyn DesktopNotifier>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let shared = Arc::new(Shared {
            view: RwLock::new(View::default()),
            connected: AtomicBool::new(false),
            notifier,
        });

        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let poll_task = tokio::spawn(poll_loop(
            config.clone(),
            http.clone(),
            shared.clone(),
            refresh_rx,
        ));
        let channel_task = tokio::spawn(channel_loop(config.clone(), shared.clone()));

        Ok(Self {
            config,
            http,
            shared,
            refresh_tx,
            poll_task,
            channel_task,
        })
    }

    /// Snapshot of the local notification list, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .notifications
            .clone()
    }

    /// Current local unread counter.
    pub fn unread_count(&self) -> usize {
        self.shared
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unread_count
    }

    /// Whether the push channel is currently up. The poll path works either
    /// way.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Request an immediate out-of-cycle poll.
    pub fn refresh(&self) {
        let _ = self.refresh_tx.send(());
    }

    /// Mark a notification as read: optimistic local flip first, then the
    /// gateway call.
    ///
    /// A gateway 404 is treated as a no-op success — the desired end state
    /// ("read") may already hold, or the record was evicted. Any other
    /// failure requests an immediate re-poll so the local view reconciles
    /// with the server.
    pub async fn mark_as_read(&self, id: Uuid) -> Result<()> {
        self.shared.mark_read_local(id);

        let request = MarkReadRequest {
            notification_id: Some(id.to_string()),
        };
        let outcome = self
            .http
            .put(self.config.list_url())
            .header("x-user-email", &self.config.identity)
            .json(&request)
            .send()
            .await;

        match outcome {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => Ok(()),
            Ok(response) => {
                tracing::warn!(
                    notification_id = %id,
                    status = %response.status(),
                    "mark-as-read rejected, reconciling"
                );
                self.refresh();
                Err(Error::Request(format!(
                    "gateway answered {}",
                    response.status()
                )))
            }
            Err(err) => {
                tracing::warn!(notification_id = %id, error = %err, "mark-as-read failed, reconciling");
                self.refresh();
                Err(err.into())
            }
        }
    }

    /// Reset the local view. Deliberately local-only: the gateway keeps its
    /// records and the next poll repopulates the list. This is a view-level
    /// "hide", not a server-side delete.
    pub fn clear_notifications(&self) {
        self.shared.clear();
    }

    /// Fabricate a local-only notification, bypassing the gateway and the
    /// store entirely. UI-testing helper; never part of the production
    /// delivery path.
    pub fn inject_local(
        &self,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Notification {
        let notification =
            Notification::new(kind, title, message, self.config.identity.clone(), None);
        self.shared.apply_push(notification.clone());
        notification
    }

    /// Tear the agent down: cancel the poll timer and close the channel.
    pub fn shutdown(&self) {
        self.poll_task.abort();
        self.channel_task.abort();
        self.shared.connected.store(false, Ordering::Relaxed);
    }
}

impl Drop for NotificationAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Authoritative re-fetch loop. The first tick fires immediately, so the
/// view populates right after spawn; afterwards it runs every poll interval
/// plus whenever [`NotificationAgent::refresh`] is called.
async fn poll_loop(
    config: AgentConfig,
    http: reqwest::Client,
    shared: Arc<Shared>,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            refresh = refresh_rx.recv() => {
                if refresh.is_none() {
                    break;
                }
            }
        }
        match fetch_list(&config, &http).await {
            Ok(list) => shared.replace(list),
            Err(err) => {
                // Poll failures never crash the view; the next cycle retries.
                tracing::warn!(error = %err, "notification poll failed");
            }
        }
    }
}

async fn fetch_list(config: &AgentConfig, http: &reqwest::Client) -> Result<NotificationList> {
    let response = http
        .get(config.list_url())
        .header("x-user-email", &config.identity)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Request(format!(
            "gateway answered {}",
            response.status()
        )));
    }
    Ok(response.json::<NotificationList>().await?)
}

/// Push-channel loop: connect, join the identity's room, forward pushes into
/// the shared view. Every exit path clears the connected flag and retries
/// after the backoff — the agent degrades to poll-only, never errors out.
async fn channel_loop(config: AgentConfig, shared: Arc<Shared>) {
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let ws_url = config.ws_url();
    loop {
        match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((mut ws, _response)) => {
                let join = ClientMessage::Join {
                    recipient: config.identity.clone(),
                };
                let joined = match serde_json::to_string(&join) {
                    Ok(json) => ws.send(WsMessage::Text(json)).await.is_ok(),
                    Err(_) => false,
                };

                if joined {
                    shared.connected.store(true, Ordering::Relaxed);
                    tracing::info!(recipient = %config.identity, "push channel connected");

                    while let Some(frame) = ws.next().await {
                        match frame {
                            Ok(WsMessage::Text(text)) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(ServerMessage::Notification { payload }) => {
                                        shared.apply_push(payload);
                                    }
                                    Ok(ServerMessage::Joined { recipient }) => {
                                        tracing::debug!(recipient = %recipient, "joined room");
                                    }
                                    Err(err) => {
                                        tracing::debug!(error = %err, "ignoring malformed channel frame");
                                    }
                                }
                            }
                            Ok(WsMessage::Close(_)) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }

                    shared.connected.store(false, Ordering::Relaxed);
                    tracing::warn!("push channel dropped, poll-only until reconnect");
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "push channel connect failed");
            }
        }
        tokio::time::sleep(config.reconnect_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::{
        extract::{
            ws::{Message as AxumWsMessage, WebSocketUpgrade},
            State,
        },
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use relay_store::NotificationStore;

    #[derive(Clone)]
    struct StubState {
        store: NotificationStore,
        /// Notification the ws stub pushes right after a Join.
        pending_push: Arc<RwLock<Option<Notification>>>,
    }

    fn stub_identity(headers: &HeaderMap) -> String {
        headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    async fn stub_list(
        State(state): State<StubState>,
        headers: HeaderMap,
    ) -> Json<NotificationList> {
        let identity = stub_identity(&headers);
        Json(NotificationList {
            notifications: state.store.list_for_recipient(&identity),
            unread_count: state.store.unread_count(&identity),
        })
    }

    async fn stub_mark(
        State(state): State<StubState>,
        Json(request): Json<MarkReadRequest>,
    ) -> impl IntoResponse {
        let id = request
            .notification_id
            .and_then(|raw| Uuid::parse_str(&raw).ok());
        match id {
            Some(id) if state.store.mark_read(id) => {
                Json(serde_json::json!({ "success": true })).into_response()
            }
            _ => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "not found" })),
            )
                .into_response(),
        }
    }

    async fn stub_ws(ws: WebSocketUpgrade, State(state): State<StubState>) -> impl IntoResponse {
        ws.on_upgrade(move |mut socket| async move {
            while let Some(Ok(msg)) = socket.recv().await {
                if let AxumWsMessage::Text(text) = msg {
                    if let Ok(ClientMessage::Join { recipient }) = serde_json::from_str(&text) {
                        let ack = serde_json::to_string(&ServerMessage::Joined { recipient })
                            .unwrap();
                        if socket.send(AxumWsMessage::Text(ack)).await.is_err() {
                            return;
                        }
                        let pending = state
                            .pending_push
                            .read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        if let Some(payload) = pending {
                            let frame = serde_json::to_string(&ServerMessage::Notification {
                                payload,
                            })
                            .unwrap();
                            let _ = socket.send(AxumWsMessage::Text(frame)).await;
                        }
                    }
                }
            }
        })
    }

    /// Spawn a stub gateway. `with_channel` controls whether the ws route
    /// exists, so channel outage is simulated by simply not routing it.
    async fn spawn_stub(with_channel: bool) -> (String, StubState) {
        let state = StubState {
            store: NotificationStore::with_retention(0),
            pending_push: Arc::new(RwLock::new(None)),
        };

        let mut router = Router::new().route(
            "/api/v1/notifications",
            get(stub_list).put(stub_mark),
        );
        if with_channel {
            router = router.route("/api/v1/ws", get(stub_ws));
        }
        let router = router.with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        (format!("http://{}", addr), state)
    }

    fn fast_config(base_url: &str, identity: &str) -> AgentConfig {
        let mut config = AgentConfig::new(base_url, identity);
        config.poll_interval = Duration::from_millis(50);
        config.reconnect_backoff = Duration::from_millis(100);
        config.request_timeout = Duration::from_secs(2);
        config
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..150 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met within 3s");
    }

    struct RecordingNotifier {
        titles: Arc<Mutex<Vec<String>>>,
    }

    impl DesktopNotifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.titles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.title.clone());
        }
    }

    #[tokio::test]
    async fn test_poll_fallback_without_channel() {
        let (base_url, state) = spawn_stub(false).await;
        state.store.create(
            NotificationKind::TaskAdded,
            "📝 Yeni Görev Eklendi",
            "\"Buy milk\" görev listenize eklendi",
            "alice@example.com",
            None,
        );

        let agent =
            NotificationAgent::spawn(fast_config(&base_url, "alice@example.com")).unwrap();

        // Channel can never connect; the record arrives via polling anyway.
        wait_until(|| agent.notifications().len() == 1).await;
        assert_eq!(agent.unread_count(), 1);
        assert!(!agent.is_connected());
        assert_eq!(agent.notifications()[0].title, "📝 Yeni Görev Eklendi");
    }

    #[tokio::test]
    async fn test_push_received_and_deduplicated_against_poll() {
        let (base_url, state) = spawn_stub(true).await;

        // The stub serves the same record over both the poll and the push
        // path; the agent must end up with exactly one copy.
        let pushed = state.store.create(
            NotificationKind::TaskCompleted,
            "✅ Görev Tamamlandı!",
            "\"Write report\" başarıyla tamamlandı",
            "alice@example.com",
            None,
        );
        *state
            .pending_push
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pushed.clone());

        let titles = Arc::new(Mutex::new(Vec::new()));
        let agent = NotificationAgent::spawn_with_notifier(
            fast_config(&base_url, "alice@example.com"),
            Box::new(RecordingNotifier {
                titles: titles.clone(),
            }),
        )
        .unwrap();

        wait_until(|| agent.is_connected()).await;
        wait_until(|| !agent.notifications().is_empty()).await;

        // Let a few poll cycles pass; the view must stay deduplicated.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = agent.notifications();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, pushed.id);
        assert_eq!(agent.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_optimistic_and_floored() {
        let (base_url, state) = spawn_stub(false).await;
        let created = state.store.create(
            NotificationKind::TaskAdded,
            "t",
            "m",
            "alice@example.com",
            None,
        );

        let agent =
            NotificationAgent::spawn(fast_config(&base_url, "alice@example.com")).unwrap();
        wait_until(|| agent.notifications().len() == 1).await;

        agent.mark_as_read(created.id).await.unwrap();
        assert!(agent.notifications()[0].read);
        assert_eq!(agent.unread_count(), 0);
        // The stub's store saw the write too.
        assert_eq!(state.store.unread_count("alice@example.com"), 0);

        // Second call: still success, counter stays floored at zero.
        agent.mark_as_read(created.id).await.unwrap();
        assert_eq!(agent.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_as_read_unknown_id_is_noop() {
        let (base_url, _state) = spawn_stub(false).await;
        let agent =
            NotificationAgent::spawn(fast_config(&base_url, "alice@example.com")).unwrap();

        // Gateway answers 404; the agent treats the end state as reached.
        agent.mark_as_read(Uuid::new_v4()).await.unwrap();
        assert_eq!(agent.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_is_local_only() {
        let (base_url, state) = spawn_stub(false).await;
        state.store.create(
            NotificationKind::TaskAdded,
            "t",
            "m",
            "alice@example.com",
            None,
        );

        // Slower poll so the clear is observable before the next cycle.
        let mut config = fast_config(&base_url, "alice@example.com");
        config.poll_interval = Duration::from_millis(300);
        let agent = NotificationAgent::spawn(config).unwrap();
        wait_until(|| agent.notifications().len() == 1).await;

        agent.clear_notifications();
        assert!(agent.notifications().is_empty());
        assert_eq!(agent.unread_count(), 0);

        // The gateway was not touched: the next poll repopulates the view.
        assert_eq!(state.store.len(), 1);
        wait_until(|| agent.notifications().len() == 1).await;
    }

    #[tokio::test]
    async fn test_inject_local_fires_notifier_and_skips_gateway() {
        let (base_url, state) = spawn_stub(false).await;

        let titles = Arc::new(Mutex::new(Vec::new()));
        let mut config = fast_config(&base_url, "alice@example.com");
        // Slow the poll down so the injected record is not replaced mid-test.
        config.poll_interval = Duration::from_secs(60);
        let agent = NotificationAgent::spawn_with_notifier(
            config,
            Box::new(RecordingNotifier {
                titles: titles.clone(),
            }),
        )
        .unwrap();
        // Let the immediate first poll settle before injecting.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let injected =
            agent.inject_local(NotificationKind::TaskCompleted, "✅ Test", "test message");

        let snapshot = agent.notifications();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, injected.id);
        assert_eq!(agent.unread_count(), 1);
        assert_eq!(
            titles.lock().unwrap_or_else(PoisonError::into_inner).as_slice(),
            ["✅ Test"]
        );
        // Nothing reached the gateway's store.
        assert_eq!(state.store.len(), 0);
    }

    #[test]
    fn test_ws_url_derivation() {
        let config = AgentConfig::new("http://127.0.0.1:3000/", "alice");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:3000/api/v1/ws");

        let config = AgentConfig::new("https://tasks.example.com", "alice");
        assert_eq!(config.ws_url(), "wss://tasks.example.com/api/v1/ws");
    }

    #[test]
    fn test_shared_view_push_then_poll_replace() {
        let shared = Shared {
            view: RwLock::new(View::default()),
            connected: AtomicBool::new(false),
            notifier: Box::new(LogNotifier),
        };

        let pushed = Notification::new(NotificationKind::TaskAdded, "t", "m", "alice", None);
        shared.apply_push(pushed.clone());
        shared.apply_push(pushed.clone()); // duplicate push ignored
        {
            let view = shared.view.read().unwrap();
            assert_eq!(view.notifications.len(), 1);
            assert_eq!(view.unread_count, 1);
        }

        // Poll replaces wholesale, including the authoritative counter.
        let other = Notification::new(NotificationKind::TaskAssigned, "t2", "m2", "alice", None);
        shared.replace(NotificationList {
            notifications: vec![other.clone(), pushed.clone()],
            unread_count: 2,
        });
        let view = shared.view.read().unwrap();
        assert_eq!(view.notifications.len(), 2);
        assert_eq!(view.notifications[0].id, other.id);
        assert_eq!(view.unread_count, 2);
    }
}
