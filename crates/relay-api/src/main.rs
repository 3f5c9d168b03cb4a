//! relay-api - HTTP and WebSocket notification server for taskrelay

mod rooms;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, State,
    },
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use relay_core::{ClientMessage, MarkReadRequest, NotificationList, ServerMessage, TaskEvent};
use relay_store::NotificationStore;
use rooms::RoomRegistry;

/// Header carrying the caller identity resolved by the outer auth layer.
const IDENTITY_HEADER: &str = "x-user-email";

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging production incidents.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    /// Process-local notification store.
    store: NotificationStore,
    /// Per-recipient room registry for WebSocket fan-out.
    rooms: RoomRegistry,
    /// Active WebSocket connection count.
    ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    fn new(store: NotificationStore) -> Self {
        Self {
            store,
            rooms: RoomRegistry::new(),
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

// =============================================================================
// CALLER IDENTITY
// =============================================================================

/// Caller identity for the notification gateway.
///
/// An opaque string resolved outside this subsystem (session/auth layer or
/// reverse proxy) and injected per request via the `x-user-email` header.
/// This service performs no authentication itself; it only partitions data
/// by the injected identity.
struct CallerIdentity(String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CallerIdentity(value.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("missing caller identity".to_string()))
    }
}

// =============================================================================
// NOTIFICATION GATEWAY
// =============================================================================

/// `GET /api/v1/notifications` — the caller's notifications, newest first,
/// plus their unread count.
async fn list_notifications(
    State(state): State<AppState>,
    identity: CallerIdentity,
) -> Result<Json<NotificationList>, ApiError> {
    let notifications = state.store.list_for_recipient(&identity.0);
    let unread_count = state.store.unread_count(&identity.0);
    Ok(Json(NotificationList {
        notifications,
        unread_count,
    }))
}

/// `PUT /api/v1/notifications` — mark one of the caller's notifications as
/// read.
///
/// Ownership is enforced: an id belonging to another recipient answers 404,
/// same as an unknown id, so existence does not leak across tenants.
/// Marking an already-read notification succeeds (idempotent).
async fn mark_notification_read(
    State(state): State<AppState>,
    identity: CallerIdentity,
    Json(request): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_id = request
        .notification_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("notification_id is required".to_string()))?;

    // An unparsable id cannot exist in the store.
    let id = Uuid::parse_str(raw_id)
        .map_err(|_| ApiError::NotFound(format!("Notification {} not found", raw_id)))?;

    let outcome = state.store.mark_read_for(id, &identity.0);
    if outcome.is_read() {
        tracing::debug!(
            notification_id = %id,
            recipient = %identity.0,
            "notification marked as read"
        );
        Ok(Json(serde_json::json!({ "success": true })))
    } else {
        // WrongRecipient and Missing answer alike: no cross-tenant leaks.
        Err(ApiError::NotFound(format!(
            "Notification {} not found",
            id
        )))
    }
}

// =============================================================================
// TASK EVENT INGESTION
// =============================================================================

/// `POST /api/v1/events/task` — the task-domain boundary.
///
/// A task-domain caller supplies only `(kind, subject, recipient?, task_id?)`;
/// display text comes entirely from the template table. The created record is
/// appended to the store and pushed best-effort to the recipient's room — if
/// nobody is connected, the client's next poll picks it up.
async fn ingest_task_event(
    State(state): State<AppState>,
    identity: CallerIdentity,
    Json(event): Json<TaskEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let subject = event.subject.trim();
    if subject.is_empty() {
        return Err(ApiError::BadRequest("subject is required".to_string()));
    }
    // An empty recipient would create records no identity can ever fetch.
    let recipient = match event.recipient.as_deref().map(str::trim) {
        Some("") => {
            return Err(ApiError::BadRequest(
                "recipient must not be empty".to_string(),
            ))
        }
        Some(explicit) => explicit.to_string(),
        None => identity.0,
    };
    let (title, message) = relay_core::templates::render(event.kind, subject);
    let data = event
        .task_id
        .map(|task_id| serde_json::json!({ "task_id": task_id }));

    let notification = state
        .store
        .create(event.kind, title, message, &recipient, data);
    let delivered = state.rooms.push_to_room(&recipient, &notification);

    info!(
        notification_id = %notification.id,
        kind = %notification.kind,
        recipient = %recipient,
        delivered,
        "task event published"
    );
    Ok((StatusCode::CREATED, Json(notification)))
}

// =============================================================================
// REALTIME CHANNEL (WebSocket)
// =============================================================================

/// WebSocket handler for targeted push delivery.
///
/// Clients connect to `/api/v1/ws`, send `{"type":"Join","recipient":...}`
/// and from then on receive `{"type":"Notification","payload":...}` frames
/// for that recipient's room.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    use futures::{SinkExt, StreamExt};

    let conn_id = Uuid::new_v4();
    let count = state.ws_connections.fetch_add(1, Ordering::Relaxed) + 1;
    info!(conn_id = %conn_id, active = count, "WebSocket connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();

    // Forward outbound frames (room pushes, join acks) to the client.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Handle incoming messages from the client.
    let registry = state.rooms.clone();
    let outbound = outbound_tx.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Join { recipient }) => {
                        registry.join(conn_id, &recipient, outbound.clone());
                        info!(conn_id = %conn_id, recipient = %recipient, "connection joined room");
                        let _ = outbound.send(ServerMessage::Joined { recipient });
                    }
                    Err(err) => {
                        tracing::debug!(conn_id = %conn_id, error = %err, "ignoring malformed channel frame");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either half finishing tears the connection down.
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }
    state.rooms.remove(conn_id);
    drop(outbound_tx);
    let count = state.ws_connections.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(conn_id = %conn_id, active = count, "WebSocket connection closed");
}

// =============================================================================
// HEALTH
// =============================================================================

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "notifications": state.store.len(),
        "ws_connections": state.ws_connections.load(Ordering::Relaxed),
        "rooms": state.rooms.room_count(),
    }))
}

// =============================================================================
// ROUTER
// =============================================================================

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/notifications",
            get(list_notifications).put(mark_notification_read),
        )
        .route("/api/v1/events/task", post(ingest_task_event))
        .route("/api/v1/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Parse allowed origins from the comma-separated `ALLOWED_ORIGINS` variable.
///
/// Defaults to `http://localhost:3000` (the task app's dev origin) when the
/// variable is unset or empty.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());

    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "relay_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("relay-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .unwrap_or(3000);

    // Per-recipient retention cap for the in-memory store (0 = unbounded).
    let retention: usize = std::env::var("RETENTION_PER_RECIPIENT")
        .unwrap_or_else(|_| relay_store::DEFAULT_RETENTION_PER_RECIPIENT.to_string())
        .parse()
        .unwrap_or(relay_store::DEFAULT_RETENTION_PER_RECIPIENT);

    info!(
        retention_per_recipient = retention,
        "Notification store initialized (process-local, no persistence)"
    );

    let state = AppState::new(NotificationStore::with_retention(retention));

    let app = build_router(state).layer({
        let allowed_origins = parse_allowed_origins();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed_origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                HeaderName::from_static(IDENTITY_HEADER),
            ])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    });

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Internal(relay_core::Error),
}

impl From<relay_core::Error> for ApiError {
    fn from(err: relay_core::Error) -> Self {
        match err {
            relay_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            relay_core::Error::NotificationNotFound(id) => {
                ApiError::NotFound(format!("Notification {} not found", id))
            }
            relay_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            relay_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(err) => {
                // Log the detail, answer with a generic message only.
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================
