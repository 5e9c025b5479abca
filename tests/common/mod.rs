use relayd::account::Account;
use relayd::config::{FullStorageAction, PolicyConfig, RelayConfig};
use relayd::manager::ClientManager;
use relayd::model::filter_matches;
use relayd::policy::PolicyEngine;
use relayd::rate_limit::IpTracker;
use relayd::server::{create_relay_router, RelayState};
use relayd::stats::RelayStats;
use relayd::storage::NostrStore;
use nostr::{Event, Filter, JsonUtil, PublicKey, RelayMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

pub struct MockStore {
    events: Mutex<HashMap<[u8; 32], (Event, PublicKey, bool)>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
        }
    }
}

impl NostrStore for MockStore {
    fn insert_event(&self, event: &Event, publisher: &PublicKey) -> relayd::error::Result<bool> {
        let mut events = self.events.lock().unwrap();
        let id = *event.id.as_bytes();
        if events.contains_key(&id) {
            return Ok(false);
        }
        events.insert(id, (event.clone(), *publisher, false));
        Ok(true)
    }

    fn get_event(&self, id: &[u8; 32]) -> relayd::error::Result<Option<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events.get(id).map(|(e, _, _)| e.clone()))
    }

    fn query_events(&self, filter: &Filter) -> relayd::error::Result<Vec<Event>> {
        let events = self.events.lock().unwrap();
        let limit = filter.limit.unwrap_or(100);

        let mut results: Vec<Event> = events
            .values()
            .filter(|(event, _, deleted)| !deleted && filter_matches(event, filter))
            .map(|(event, _, _)| event.clone())
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit);
        Ok(results)
    }

    fn mark_deleted(&self, id: &[u8; 32]) -> relayd::error::Result<bool> {
        let mut events = self.events.lock().unwrap();
        match events.get_mut(id) {
            Some(entry) => {
                entry.2 = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_events(&self, filter: &Filter) -> relayd::error::Result<u64> {
        if filter.ids.is_none()
            && filter.authors.is_none()
            && filter.kinds.is_none()
            && filter.since.is_none()
            && filter.until.is_none()
        {
            return Ok(0);
        }
        let mut events = self.events.lock().unwrap();
        let ids: Vec<[u8; 32]> = events
            .values()
            .filter(|(event, _, _)| filter_matches(event, filter))
            .map(|(event, _, _)| *event.id.as_bytes())
            .collect();
        for id in &ids {
            events.remove(id);
        }
        Ok(ids.len() as u64)
    }

    fn delete_all(&self) -> relayd::error::Result<u64> {
        let mut events = self.events.lock().unwrap();
        let n = events.len() as u64;
        events.clear();
        Ok(n)
    }

    fn storage_used(&self, publisher: &PublicKey) -> relayd::error::Result<u64> {
        let events = self.events.lock().unwrap();
        Ok(events
            .values()
            .filter(|(_, p, _)| p == publisher)
            .map(|(event, _, _)| event.as_json().len() as u64)
            .sum())
    }

    fn oldest_events(&self, pubkey: &PublicKey, limit: usize) -> relayd::error::Result<Vec<([u8; 32], u64)>> {
        let events = self.events.lock().unwrap();
        let mut items: Vec<([u8; 32], u64, nostr::Timestamp)> = events
            .values()
            .filter(|(_, p, _)| p == pubkey)
            .map(|(event, _, _)| (*event.id.as_bytes(), event.as_json().len() as u64, event.created_at))
            .collect();
        items.sort_by_key(|(_, _, created_at)| *created_at);
        items.truncate(limit);
        Ok(items.into_iter().map(|(id, size, _)| (id, size)).collect())
    }

    fn get_account(&self, _pubkey: &PublicKey) -> relayd::error::Result<Option<Account>> {
        Ok(None)
    }

    fn upsert_account(&self, _account: &Account) -> relayd::error::Result<()> {
        Ok(())
    }

    fn list_accounts(&self) -> relayd::error::Result<Vec<Account>> {
        Ok(vec![])
    }

    fn iter_all(&self) -> relayd::error::Result<Vec<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events.values().map(|(e, _, _)| e.clone()).collect())
    }

    fn event_count(&self) -> relayd::error::Result<u64> {
        let events = self.events.lock().unwrap();
        Ok(events.len() as u64)
    }

    fn db_path(&self) -> &str {
        "/tmp/moar-test-unused"
    }
}

// ---------------------------------------------------------------------------
// spawn_relay
// ---------------------------------------------------------------------------

pub fn test_relay_config(policy: PolicyConfig) -> RelayConfig {
    RelayConfig {
        name: "test".into(),
        description: None,
        subdomain: "test".into(),
        db_path: "/tmp/moar-test-unused".into(),
        policy,
        nip11: Default::default(),
        max_client_filters: 0,
        limit_per_filter: 1000,
        max_events_per_hour: 0,
        created_at_in_past: 0,
        created_at_in_future: 0,
        free_storage_value: 1024,
        free_storage_unit: "MB".into(),
        full_storage_action: FullStorageAction::Prune,
        is_paid_relay: false,
        cost_to_join: 0,
        storage_cost_value: 0,
        storage_cost_unit: "mb".into(),
        require_auth_events: false,
        skipped_auth_events: vec![],
        forced_auth_events: vec![],
        require_auth_filter: false,
        domain: "test.relay".into(),
        wallet: String::new(),
    }
}

pub async fn spawn_relay(policy: PolicyConfig) -> (u16, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let store_dyn: Arc<dyn NostrStore> = store.clone();
    let policy_engine = Arc::new(PolicyEngine::new(policy.clone()));
    let config = test_relay_config(policy);

    let manager = Arc::new(ClientManager::new());
    manager.enable("test", config, store_dyn, policy_engine).await;

    let state = Arc::new(RelayState::new(
        "test".into(),
        manager,
        std::path::PathBuf::from("/tmp/moar-test-pages"),
        "".into(),
        Arc::new(RelayStats::new()),
        Arc::new(IpTracker::new()),
    ));
    let app = create_relay_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (port, store)
}

// ---------------------------------------------------------------------------
// WsTestClient
// ---------------------------------------------------------------------------

pub struct WsTestClient {
    sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    stream: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl WsTestClient {
    pub async fn connect(port: u16) -> Self {
        let url = format!("ws://127.0.0.1:{}/", port);
        let (ws, _) = connect_async(&url).await.expect("failed to connect");
        let (sink, stream) = ws.split();
        Self { sink, stream }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .expect("failed to send");
    }

    pub async fn send_event(&mut self, event: &Event) {
        let msg = format!(r#"["EVENT",{}]"#, event.as_json());
        self.send_text(&msg).await;
    }

    pub async fn send_req(&mut self, sub_id: &str, filters: Vec<Filter>) {
        let filters_json: Vec<String> = filters.iter().map(|f| f.as_json()).collect();
        let msg = format!(r#"["REQ","{}",{}]"#, sub_id, filters_json.join(","));
        self.send_text(&msg).await;
    }

    pub async fn recv_text(&mut self) -> String {
        let timeout = tokio::time::Duration::from_secs(5);
        tokio::time::timeout(timeout, async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue, // skip non-text
                    Some(Err(e)) => panic!("ws error: {}", e),
                    None => panic!("ws stream ended"),
                }
            }
        })
        .await
        .expect("timeout waiting for ws message")
    }

    pub async fn expect_ok(&mut self) -> (bool, String) {
        let text = self.recv_text().await;
        let msg = RelayMessage::from_json(&text).expect("failed to parse relay message");
        match msg {
            RelayMessage::Ok {
                status, message, ..
            } => (status, message),
            other => panic!("expected OK, got: {:?}", other),
        }
    }

    pub async fn expect_notice(&mut self) -> String {
        let text = self.recv_text().await;
        let msg = RelayMessage::from_json(&text).expect("failed to parse relay message");
        match msg {
            RelayMessage::Notice { message } => message,
            other => panic!("expected NOTICE, got: {:?}", other),
        }
    }

    pub async fn expect_auth(&mut self) -> String {
        let text = self.recv_text().await;
        let msg = RelayMessage::from_json(&text).expect("failed to parse relay message");
        match msg {
            RelayMessage::Auth { challenge } => challenge,
            other => panic!("expected AUTH, got: {:?}", other),
        }
    }

    pub async fn expect_eose(&mut self) {
        let text = self.recv_text().await;
        let msg = RelayMessage::from_json(&text).expect("failed to parse relay message");
        match msg {
            RelayMessage::EndOfStoredEvents(_) => {}
            other => panic!("expected EOSE, got: {:?}", other),
        }
    }

    pub async fn expect_event(&mut self) -> Event {
        let text = self.recv_text().await;
        let msg = RelayMessage::from_json(&text).expect("failed to parse relay message");
        match msg {
            RelayMessage::Event { event, .. } => *event,
            other => panic!("expected EVENT, got: {:?}", other),
        }
    }
}
