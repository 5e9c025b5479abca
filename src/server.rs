use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use nostr::{ClientMessage, JsonUtil, RelayMessage};
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::RelayConfig;
use crate::connection::{Connection, Outcome};
use crate::manager::{ClientManager, ManagedRelay};
use crate::rate_limit::IpTracker;
use crate::stats::RelayStats;

/// Per-relay HTTP/WebSocket state. One of these backs each subdomain's
/// router; the relay registration itself (config, storage, policy) lives in
/// the shared [`ClientManager`] so it can be enabled/disabled without
/// rebuilding this router.
pub struct RelayState {
    pub relay_id: String,
    pub manager: Arc<ClientManager>,
    pub pages_dir: PathBuf,
    pub admin_pubkey: String,
    pub stats: Arc<RelayStats>,
    pub ip_tracker: Arc<IpTracker>,
}

impl RelayState {
    pub fn new(
        relay_id: String,
        manager: Arc<ClientManager>,
        pages_dir: PathBuf,
        admin_pubkey: String,
        stats: Arc<RelayStats>,
        ip_tracker: Arc<IpTracker>,
    ) -> Self {
        Self {
            relay_id,
            manager,
            pages_dir,
            admin_pubkey,
            stats,
            ip_tracker,
        }
    }
}

pub fn create_relay_router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .layer(cors)
        .with_state(state)
}

/// Handles NIP-11 info document, WebSocket upgrades, and regular HTTP GET requests.
async fn root_handler(
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    let relay = match state.manager.get(&state.relay_id).await {
        Ok(r) => r,
        Err(reason) => return (StatusCode::SERVICE_UNAVAILABLE, reason.to_string()).into_response(),
    };
    let config = relay.current_config().await;

    if let Some(accept) = headers.get(header::ACCEPT) {
        if let Ok(accept_str) = accept.to_str() {
            if accept_str.contains("application/nostr+json") {
                let doc = build_nip11(&config, &state.admin_pubkey);
                let json = serde_json::to_string(&doc).unwrap_or_default();
                return ([(header::CONTENT_TYPE, "application/nostr+json")], json).into_response();
            }
        }
    }

    let client_ip = extract_client_ip(&headers);

    if let Some(ws) = ws {
        let max_conn = config.policy.rate_limit.as_ref().and_then(|r| r.max_connections);
        if !state.ip_tracker.try_connect(client_ip, max_conn) {
            return (StatusCode::SERVICE_UNAVAILABLE, "too many connections from your IP").into_response();
        }
        let relay_id = state.relay_id.clone();
        let stats = state.stats.clone();
        let ip_tracker = state.ip_tracker.clone();
        return ws
            .on_upgrade(move |socket| handle_socket(socket, relay, relay_id, stats, ip_tracker, client_ip))
            .into_response();
    }

    let page_path = state.pages_dir.join(format!("{}.html", state.relay_id));
    if let Ok(content) = tokio::fs::read_to_string(&page_path).await {
        return Html(content).into_response();
    }

    let name = html_escape(&config.name);
    let desc = config.description.as_deref().unwrap_or("A Nostr relay powered by MOAR");
    let desc = html_escape(desc);
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{name}</title>
<style>
*{{margin:0;padding:0;box-sizing:border-box}}
body{{background:#0a0a0a;color:#fff;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;display:flex;align-items:center;justify-content:center;min-height:100vh}}
.container{{text-align:center;max-width:480px;padding:2rem}}
h1{{font-size:1.5rem;margin-bottom:0.5rem}}
p{{color:#888;font-size:0.95rem;line-height:1.5}}
.badge{{display:inline-block;background:#1a1a2e;border:1px solid #333;border-radius:9999px;padding:0.25rem 0.75rem;font-size:0.75rem;color:#aaa;margin-top:1rem;font-family:monospace}}
</style>
</head>
<body>
<div class="container">
<h1>{name}</h1>
<p>{desc}</p>
<span class="badge">Nostr Relay</span>
</div>
</body>
</html>"#
    );

    Html(html).into_response()
}

/// Extract client IP from X-Forwarded-For header, falling back to loopback.
fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first) = xff_str.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// --- NIP-11 Relay Information Document ---

#[derive(Serialize)]
struct Nip11Document {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<String>,
    supported_nips: Vec<u32>,
    software: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terms_of_service: Option<String>,
    limitation: Nip11Limitation,
}

#[derive(Serialize)]
struct Nip11Limitation {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_message_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_subscriptions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_subid_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_event_tags: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_pow_difficulty: Option<u8>,
    auth_required: bool,
    restricted_writes: bool,
    payment_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at_lower_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at_upper_limit: Option<u64>,
}

fn build_nip11(config: &RelayConfig, admin_pubkey: &str) -> Nip11Document {
    let policy = &config.policy;
    let nip11 = &config.nip11;

    let auth_required = policy.write.require_auth || policy.read.require_auth || config.require_auth_events;
    let restricted_writes = policy.write.allowed_pubkeys.is_some() || policy.write.tagged_pubkeys.is_some();
    let payment_required = config.is_paid_relay;

    let pubkey = if admin_pubkey.is_empty() {
        None
    } else {
        Some(admin_pubkey.to_string())
    };

    Nip11Document {
        name: config.name.clone(),
        description: config.description.clone(),
        pubkey,
        contact: nip11.contact.clone(),
        // NIP-01, NIP-02, NIP-04, NIP-09, NIP-11, NIP-15, NIP-16, NIP-20, NIP-22, NIP-28, NIP-42.
        supported_nips: vec![1, 2, 4, 9, 11, 15, 16, 20, 22, 28, 42],
        software: "https://github.com/barrydeen/moar".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        icon: nip11.icon.clone(),
        banner: nip11.banner.clone(),
        terms_of_service: nip11.terms_of_service.clone(),
        limitation: Nip11Limitation {
            max_message_length: nip11.max_message_length,
            max_subscriptions: nip11.max_subscriptions,
            max_subid_length: nip11.max_subid_length,
            max_limit: nip11.max_limit,
            max_content_length: policy.events.max_content_length.map(|v| v as u64),
            max_event_tags: nip11.max_event_tags,
            default_limit: nip11.default_limit,
            min_pow_difficulty: policy.events.min_pow,
            auth_required,
            restricted_writes,
            payment_required,
            created_at_lower_limit: nip11.created_at_lower_limit,
            created_at_upper_limit: nip11.created_at_upper_limit,
        },
    }
}

// --- WebSocket Handler ---

struct ConnectionGuard {
    stats: Arc<RelayStats>,
    ip_tracker: Arc<IpTracker>,
    ip: IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Relaxed);
        self.ip_tracker.disconnect(self.ip);
    }
}

async fn send_msg(sender: &mut futures::stream::SplitSink<WebSocket, Message>, msg: String, stats: &RelayStats) {
    stats.bytes_tx.fetch_add(msg.len() as u64, Relaxed);
    let _ = sender.send(Message::Text(msg.into())).await;
}

async fn handle_socket(
    socket: WebSocket,
    relay: Arc<ManagedRelay>,
    relay_id: String,
    stats: Arc<RelayStats>,
    ip_tracker: Arc<IpTracker>,
    client_ip: IpAddr,
) {
    let (mut sender, mut receiver) = socket.split();

    stats.active_connections.fetch_add(1, Relaxed);
    stats.total_connections.fetch_add(1, Relaxed);
    let _guard = ConnectionGuard {
        stats: stats.clone(),
        ip_tracker: ip_tracker.clone(),
        ip: client_ip,
    };

    let mut conn = Connection::new(relay_id);
    let mut broadcast_rx = relay.events_tx.subscribe();
    let mut stop_rx = relay.stop_tx.subscribe();

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    if frame.is_none() {
                        break;
                    }
                    continue;
                };
                stats.bytes_rx.fetch_add(text.len() as u64, Relaxed);

                let config = relay.current_config().await;
                let max_message_length = config.nip11.max_message_length.unwrap_or(524288) as usize;
                if text.len() > max_message_length {
                    send_msg(
                        &mut sender,
                        RelayMessage::notice(format!("message too large ({} > {})", text.len(), max_message_length)).as_json(),
                        &stats,
                    )
                    .await;
                    continue;
                }
                let rate_limit = config.policy.rate_limit.clone();

                match ClientMessage::from_json(&text) {
                    Ok(ClientMessage::Event(event)) => {
                        let ok_to_write = rate_limit
                            .as_ref()
                            .map(|rl| ip_tracker.check_write_rate(client_ip, rl.writes_per_minute))
                            .unwrap_or(true);
                        if !ok_to_write {
                            send_msg(
                                &mut sender,
                                RelayMessage::ok(event.id, false, "rate-limited: too many writes per minute").as_json(),
                                &stats,
                            )
                            .await;
                            continue;
                        }
                        match conn.handle_event(*event, &relay).await {
                            Outcome::Reply(msgs) => {
                                for m in msgs {
                                    send_msg(&mut sender, m.as_json(), &stats).await;
                                }
                            }
                            Outcome::Close(msgs) => {
                                for m in msgs {
                                    send_msg(&mut sender, m.as_json(), &stats).await;
                                }
                                break;
                            }
                        }
                    }
                    Ok(ClientMessage::Req { subscription_id, filters }) => {
                        let ok_to_read = rate_limit
                            .as_ref()
                            .map(|rl| ip_tracker.check_read_rate(client_ip, rl.reads_per_minute))
                            .unwrap_or(true);
                        if !ok_to_read {
                            send_msg(&mut sender, RelayMessage::notice("rate-limited: too many reads per minute").as_json(), &stats).await;
                            continue;
                        }
                        match conn.handle_req(subscription_id, filters, &relay).await {
                            Outcome::Reply(msgs) => {
                                for m in msgs {
                                    send_msg(&mut sender, m.as_json(), &stats).await;
                                }
                            }
                            Outcome::Close(msgs) => {
                                for m in msgs {
                                    send_msg(&mut sender, m.as_json(), &stats).await;
                                }
                                break;
                            }
                        }
                    }
                    Ok(ClientMessage::Close(sub_id)) => conn.handle_close(&sub_id),
                    Ok(ClientMessage::Auth(_)) => {
                        let msg = conn.handle_auth_request();
                        send_msg(&mut sender, msg.as_json(), &stats).await;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("invalid Nostr message: {}", e),
                }
            }
            Ok(event) = broadcast_rx.recv() => {
                for m in conn.deliver(&event, &relay).await {
                    send_msg(&mut sender, m.as_json(), &stats).await;
                }
            }
            Ok(reason) = stop_rx.recv() => {
                send_msg(&mut sender, RelayMessage::notice(reason).as_json(), &stats).await;
                break;
            }
            else => break,
        }
    }
}
