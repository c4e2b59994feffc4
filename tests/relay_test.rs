//! End-to-end relay sessions: two devices syncing through a live relay.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;

use hearth_sync::config::Config;
use hearth_sync::doc::records::{new_id, now_ms, ShoppingItem};
use hearth_sync::doc::Container;
use hearth_sync::relay::{server, AccessGate, RelayState};
use hearth_sync::store::MemoryStore;
use hearth_sync::sync::{SyncContext, SyncStatus};

const HOUSEHOLD: &str = "smith-family";

async fn start_relay() -> (String, Arc<RelayState>) {
    let gate = AccessGate::new("test-secret", "admin-token", Duration::from_secs(3600));
    let state = Arc::new(RelayState::new(gate, Box::new(MemoryStore::new())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("ws://{addr}"), state)
}

fn device(host: &str, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.relay.dev_host = host.to_string();
    config.storage.data_dir = dir.path().to_path_buf();
    config
}

fn item(name: &str) -> ShoppingItem {
    ShoppingItem {
        id: new_id(),
        name: name.to_string(),
        quantity: 1,
        done: false,
        added_by: None,
        created_at: now_ms(),
    }
}

async fn wait_online(ctx: &SyncContext) {
    let mut status = ctx.status();
    tokio::time::timeout(Duration::from_secs(5), async {
        while status.borrow().status != SyncStatus::Online {
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("session did not reach online");
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn two_devices_sync_through_the_relay() {
    let (host, state) = start_relay().await;
    let token_a = state.gate().issue_session("Ada", HOUSEHOLD).unwrap();
    let token_b = state.gate().issue_session("Ben", HOUSEHOLD).unwrap();

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = SyncContext::open(&device(&host, &dir_a), HOUSEHOLD, Some(token_a)).unwrap();
    let b = SyncContext::open(&device(&host, &dir_b), HOUSEHOLD, Some(token_b)).unwrap();
    wait_online(&a).await;
    wait_online(&b).await;

    a.shopping().add(&item("Milk")).unwrap();
    wait_for("b to receive a's item", || {
        b.doc().records(Container::ShoppingItems).len() == 1
    })
    .await;

    b.shopping().add(&item("Eggs")).unwrap();
    wait_for("a to receive b's item", || {
        a.doc().records(Container::ShoppingItems).len() == 2
    })
    .await;

    assert_eq!(
        a.doc().records(Container::ShoppingItems),
        b.doc().records(Container::ShoppingItems)
    );
    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn late_joiner_catches_up_from_the_room_document() {
    let (host, state) = start_relay().await;
    let token_a = state.gate().issue_session("Ada", HOUSEHOLD).unwrap();
    let token_b = state.gate().issue_session("Ben", HOUSEHOLD).unwrap();

    let dir_a = TempDir::new().unwrap();
    let a = SyncContext::open(&device(&host, &dir_a), HOUSEHOLD, Some(token_a)).unwrap();
    wait_online(&a).await;
    a.shopping().add(&item("Milk")).unwrap();
    a.shopping().add(&item("Eggs")).unwrap();
    wait_for("relay to absorb a's writes", || {
        a.doc().records(Container::ShoppingItems).len() == 2
    })
    .await;
    // Give the relay a beat to merge before the writer disappears.
    tokio::time::sleep(Duration::from_millis(200)).await;
    a.close().await;

    // The second device was never online at the same time as the first.
    let dir_b = TempDir::new().unwrap();
    let b = SyncContext::open(&device(&host, &dir_b), HOUSEHOLD, Some(token_b)).unwrap();
    wait_online(&b).await;
    wait_for("late joiner to catch up", || {
        b.doc().records(Container::ShoppingItems).len() == 2
    })
    .await;
    b.close().await;
}

#[tokio::test]
async fn offline_edits_reconcile_on_next_connection() {
    let (host, state) = start_relay().await;
    let dir = TempDir::new().unwrap();
    let config = device(&host, &dir);

    // Fully offline session on this device.
    let offline = SyncContext::open(&config, HOUSEHOLD, None).unwrap();
    offline.shopping().add(&item("Written offline")).unwrap();
    offline.close().await;

    // Same device reconnects later; the reconciliation exchange pushes
    // the offline write up to the room.
    let token = state.gate().issue_session("Ada", HOUSEHOLD).unwrap();
    let online = SyncContext::open(&config, HOUSEHOLD, Some(token)).unwrap();
    wait_online(&online).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    online.close().await;

    // A different device sees it.
    let token = state.gate().issue_session("Ben", HOUSEHOLD).unwrap();
    let dir_b = TempDir::new().unwrap();
    let other = SyncContext::open(&device(&host, &dir_b), HOUSEHOLD, Some(token)).unwrap();
    wait_online(&other).await;
    wait_for("offline edit to reach the other device", || {
        other
            .doc()
            .typed_records::<ShoppingItem>(Container::ShoppingItems)
            .iter()
            .any(|i| i.name == "Written offline")
    })
    .await;
    other.close().await;
}

#[tokio::test]
async fn invalid_token_is_refused_at_upgrade() {
    let (host, _state) = start_relay().await;
    let url = format!("{host}/parties/main/{HOUSEHOLD}?token=forged");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn token_for_another_household_is_refused() {
    let (host, state) = start_relay().await;
    let token = state.gate().issue_session("Ada", "other-family").unwrap();
    let url = format!("{host}/parties/main/{HOUSEHOLD}?token={token}");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}
