use crate::auth::verify_auth_event;
use crate::config::{MoarConfig, RelayConfig};
use crate::manager::ClientManager;
use crate::policy::PolicyEngine;
use crate::rate_limit::IpTracker;
use crate::server::{self, RelayState};
use crate::stats::RelayStats;
use crate::storage::NostrStore;
use axum::{
    body::Body,
    extract::{Host, Path, Query, Request, State},
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tower::ServiceExt;

#[derive(Clone)]
pub struct GatewayState {
    pub domain: String,
    pub port: u16,
    pub manager: Arc<ClientManager>,
    pub relay_routers: HashMap<String, Router>,
    pub config: Arc<RwLock<MoarConfig>>,
    pub config_path: PathBuf,
    pub pages_dir: PathBuf,
    pub pending_restart: Arc<RwLock<bool>>,
    pub sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
}

#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub pubkey: String,
    pub created_at: u64,
}

impl SessionInfo {
    fn is_expired(&self) -> bool {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        now - self.created_at > 24 * 60 * 60
    }
}

/// One relay's startup material: config, storage, admission policy, and the
/// stats counters the background loop will keep refreshed.
pub struct RelayBundle {
    pub config: RelayConfig,
    pub store: Arc<dyn NostrStore>,
    pub policy: Arc<PolicyEngine>,
    pub stats: Arc<RelayStats>,
}

pub async fn start_gateway(
    port: u16,
    domain: String,
    relays: HashMap<String, RelayBundle>,
    config: MoarConfig,
    config_path: PathBuf,
) -> crate::error::Result<()> {
    let pages_dir = PathBuf::from(&config.pages_dir);
    let _ = tokio::fs::create_dir_all(&pages_dir).await;

    let manager = Arc::new(ClientManager::new());
    let mut router_map = HashMap::new();

    for (relay_id, bundle) in relays {
        manager
            .enable(relay_id.clone(), bundle.config.clone(), bundle.store, bundle.policy)
            .await;

        let ip_tracker = Arc::new(IpTracker::new());
        let state = Arc::new(RelayState::new(
            relay_id.clone(),
            manager.clone(),
            pages_dir.clone(),
            config.admin_pubkey.clone(),
            bundle.stats,
            ip_tracker,
        ));
        let app = server::create_relay_router(state);
        router_map.insert(bundle.config.subdomain.clone(), app);
    }

    let state = Arc::new(GatewayState {
        domain: domain.clone(),
        port,
        manager,
        relay_routers: router_map,
        config: Arc::new(RwLock::new(config)),
        config_path,
        pages_dir,
        pending_restart: Arc::new(RwLock::new(false)),
        sessions: Arc::new(RwLock::new(HashMap::new())),
    });

    let app = Router::new().fallback(handler).with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{}:{} (domain: {})", "0.0.0.0", port, domain);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handler(
    State(state): State<Arc<GatewayState>>,
    Host(host): Host,
    _uri: Uri,
    request: Request<Body>,
) -> Response {
    let hostname = host.split(':').next().unwrap_or(&host);

    if hostname == state.domain || hostname == "localhost" {
        let router = admin_router().with_state(state.clone());
        return match router.oneshot(request).await {
            Ok(res) => res,
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Admin router error").into_response(),
        };
    }

    if let Some(subdomain) = hostname.strip_suffix(&state.domain) {
        let sub = subdomain.strip_suffix('.').unwrap_or(subdomain);
        if let Some(router) = state.relay_routers.get(sub) {
            let router = router.clone();
            return match router.oneshot(request).await {
                Ok(res) => res,
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Relay router error").into_response(),
            };
        }
    }

    (StatusCode::NOT_FOUND, format!("Service not found for host: {}", hostname)).into_response()
}

// --- Admin Router ---

pub fn admin_router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/login", post(login_handler))
        .route("/api/logout", post(logout_handler))
        .route("/api/status", get(status_handler))
        .route("/api/relays", get(list_relays))
        .route("/api/relays/:id/enable", post(enable_relay))
        .route("/api/relays/:id/disable", post(disable_relay))
        .route("/api/restart", post(restart_handler))
        .route("/.well-known/caddy-ask", get(caddy_ask_handler))
}

async fn serve_index() -> impl IntoResponse {
    Html(
        "<!DOCTYPE html><html><head><title>relayd admin</title></head>\
         <body><h1>relayd</h1><p>Log in with a NIP-98 event to manage relays.</p>\
         </body></html>"
            .to_string(),
    )
}

// --- Auth helpers ---

fn extract_session_token(request_headers: &axum::http::HeaderMap) -> Option<String> {
    let cookie_header = request_headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let trimmed = part.trim();
        if let Some(value) = trimmed.strip_prefix("moar_session=") {
            return Some(value.to_string());
        }
    }
    None
}

async fn require_auth(
    headers: &axum::http::HeaderMap,
    sessions: &Arc<RwLock<HashMap<String, SessionInfo>>>,
) -> Result<String, Response> {
    let token = extract_session_token(headers).ok_or_else(|| (StatusCode::UNAUTHORIZED, "Not authenticated").into_response())?;

    let sessions_read = sessions.read().await;
    let session = sessions_read
        .get(&token)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Invalid session").into_response())?;

    if session.is_expired() {
        drop(sessions_read);
        sessions.write().await.remove(&token);
        return Err((StatusCode::UNAUTHORIZED, "Session expired").into_response());
    }

    Ok(session.pubkey.clone())
}

// --- Handlers ---

async fn login_handler(State(state): State<Arc<GatewayState>>, Json(event): Json<nostr::Event>) -> impl IntoResponse {
    if let Err(e) = verify_auth_event(&event, "/api/login", "POST") {
        return (StatusCode::UNAUTHORIZED, e).into_response();
    }

    let pubkey = event.pubkey.to_hex();

    let config = state.config.read().await;
    if pubkey != config.admin_pubkey {
        return (StatusCode::FORBIDDEN, "Not authorized as admin").into_response();
    }
    drop(config);

    let token = uuid::Uuid::new_v4().to_string();
    let session = SessionInfo {
        pubkey,
        created_at: SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs(),
    };
    state.sessions.write().await.insert(token.clone(), session);

    let cookie = format!("moar_session={}; HttpOnly; Path=/; SameSite=Strict", token);
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], "Logged in").into_response()
}

async fn logout_handler(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(request.headers()) {
        state.sessions.write().await.remove(&token);
    }
    let cookie = "moar_session=; HttpOnly; Path=/; SameSite=Strict; Max-Age=0";
    (StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())], "Logged out").into_response()
}

#[derive(Serialize)]
struct StatusResponse {
    pending_restart: bool,
    domain: String,
    port: u16,
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let pending = *state.pending_restart.read().await;
    Json(StatusResponse {
        pending_restart: pending,
        domain: state.domain.clone(),
        port: state.port,
    })
}

#[derive(Serialize)]
struct RelaySummary {
    id: String,
    active: bool,
}

async fn list_relays(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let relays: Vec<RelaySummary> = state
        .manager
        .list()
        .await
        .into_iter()
        .map(|(id, active)| RelaySummary { id, active })
        .collect();
    Json(relays)
}

async fn enable_relay(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    request: Request<Body>,
) -> impl IntoResponse {
    if let Err(resp) = require_auth(request.headers(), &state.sessions).await {
        return resp;
    }

    let relay = match state.manager.get(&id).await {
        Ok(relay) => relay,
        Err(_) => {
            // Not currently active: re-enable needs the relay to already be
            // registered from startup (config-driven relay creation is out
            // of scope for the trimmed admin surface).
            return (StatusCode::NOT_FOUND, format!("Relay '{}' is not registered", id)).into_response();
        }
    };
    let config = relay.current_config().await;
    state.manager.enable(id, config, relay.store.clone(), relay.policy.clone()).await;
    (StatusCode::OK, "Relay enabled").into_response()
}

async fn disable_relay(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    request: Request<Body>,
) -> impl IntoResponse {
    if let Err(resp) = require_auth(request.headers(), &state.sessions).await {
        return resp;
    }
    state.manager.disable(&id).await;
    (StatusCode::OK, "Relay disabled").into_response()
}

// --- Restart Handler ---

async fn restart_handler(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> impl IntoResponse {
    if let Err(resp) = require_auth(request.headers(), &state.sessions).await {
        return resp;
    }

    tracing::info!("Restart requested via admin UI, exiting process for container restart");

    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        std::process::exit(0);
    });

    (StatusCode::OK, "Restarting...").into_response()
}

// --- Caddy On-Demand TLS ---

async fn caddy_ask_handler(Query(params): Query<HashMap<String, String>>, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let Some(domain) = params.get("domain") else {
        return StatusCode::BAD_REQUEST;
    };

    if domain == &state.domain {
        return StatusCode::OK;
    }

    let expected_suffix = format!(".{}", state.domain);
    if let Some(subdomain) = domain.strip_suffix(&expected_suffix) {
        if state.relay_routers.contains_key(subdomain) {
            return StatusCode::OK;
        }
    }

    StatusCode::NOT_FOUND
}
