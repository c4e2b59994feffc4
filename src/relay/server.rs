//! Relay server
//!
//! Holds one replicated document per household room so devices do not need
//! to be online simultaneously. Admission goes through the access gate;
//! each join runs a reconciliation exchange, after which incremental
//! updates are merged into the room document, persisted, and rebroadcast
//! to the other members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use automerge::AutoCommit;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tracing::{debug, info, warn};

use super::gate::AccessGate;
use super::protocol::{self, RelayMessage};
use crate::doc;
use crate::store::{LocalStore, StoredState};

/// Frame fanned out within a room; receivers skip frames they originated.
#[derive(Debug, Clone)]
struct RoomFrame {
    origin: String,
    bytes: Vec<u8>,
}

struct Room {
    doc: StdMutex<AutoCommit>,
    tx: broadcast::Sender<RoomFrame>,
    peers: AtomicUsize,
}

impl Room {
    fn doc(&self) -> std::sync::MutexGuard<'_, AutoCommit> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn heads(&self) -> Vec<String> {
        self.doc().get_heads().iter().map(|h| h.to_string()).collect()
    }

    fn changes_since(&self, heads: &[String]) -> Vec<u8> {
        let mut doc = self.doc();
        let parsed = doc::decode_heads(heads);
        if parsed.is_empty() {
            return doc.save();
        }
        doc.save_after(&parsed)
    }

    fn apply(&self, payload: &[u8]) -> bool {
        if !doc::valid_payload(payload) {
            warn!(bytes = payload.len(), "dropping corrupt room update");
            return false;
        }
        let mut doc = self.doc();
        match doc.load_incremental(payload) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "dropping corrupt room update");
                false
            }
        }
    }

    fn broadcast(&self, origin: &str, msg: &RelayMessage) {
        if let Ok(bytes) = protocol::encode(msg) {
            let _ = self.tx.send(RoomFrame {
                origin: origin.to_string(),
                bytes,
            });
        }
    }
}

pub struct RelayState {
    gate: AccessGate,
    store: TokioMutex<Box<dyn LocalStore>>,
    rooms: TokioMutex<HashMap<String, Arc<Room>>>,
}

impl RelayState {
    pub fn new(gate: AccessGate, store: Box<dyn LocalStore>) -> Self {
        Self {
            gate,
            store: TokioMutex::new(store),
            rooms: TokioMutex::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    async fn open_room(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }
        let state = match self.store.lock().await.load(room_id) {
            Ok(state) => state,
            Err(e) => {
                warn!(room_id, error = %e, "failed to load room state, starting empty");
                StoredState::default()
            }
        };
        let (tx, _) = broadcast::channel(256);
        let room = Arc::new(Room {
            doc: StdMutex::new(doc::restore(&state)),
            tx,
            peers: AtomicUsize::new(0),
        });
        rooms.insert(room_id.to_string(), room.clone());
        info!(room_id, "room opened");
        room
    }

    async fn persist_update(&self, room_id: &str, payload: &[u8]) {
        if let Err(e) = self.store.lock().await.append_update(room_id, payload) {
            warn!(room_id, error = %e, "failed to persist room update");
        }
    }

    async fn compact_room(&self, room_id: &str, room: &Room) {
        let snapshot = room.doc().save();
        if let Err(e) = self.store.lock().await.compact(room_id, &snapshot) {
            warn!(room_id, error = %e, "failed to compact room");
        }
    }
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/parties/main/:room", get(ws_upgrade))
        .route("/admin/invite", post(issue_invite))
        .route("/auth/login", post(login))
        .with_state(state)
}

async fn ws_upgrade(
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.get("token").map(String::as_str).unwrap_or_default();
    let claims = match state.gate.validate(token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(room_id, error = %e, "rejected connection");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if claims.household != room_id {
        warn!(room_id, household = claims.household, "token does not grant this room");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| client_session(state, room_id, socket))
}

async fn client_session(state: Arc<RelayState>, room_id: String, mut socket: WebSocket) {
    let room = state.open_room(&room_id).await;

    // The session starts with the client's Hello.
    let Some((client_id, client_heads)) = await_hello(&mut socket).await else {
        return;
    };
    let mut rx = room.tx.subscribe();
    let count = room.peers.fetch_add(1, Ordering::SeqCst) + 1;
    info!(room_id, client_id, peers = count, "client joined");

    // Reconciliation: send what the client is missing, ask for what we
    // are missing, and tell everyone the membership changed.
    let missing = room.changes_since(&client_heads);
    let changes = if missing.is_empty() { vec![] } else { vec![missing] };
    let hello_ack = protocol::encode(&RelayMessage::HelloAck { peer_count: count });
    let sync_response = protocol::encode(&RelayMessage::SyncResponse { changes });
    let sync_request = protocol::encode(&RelayMessage::SyncRequest { heads: room.heads() });
    for frame in [hello_ack, sync_response, sync_request] {
        match frame {
            Ok(bytes) => {
                if socket.send(WsMessage::Binary(bytes)).await.is_err() {
                    leave(&state, &room_id, &room).await;
                    return;
                }
            }
            Err(e) => warn!(error = %e, "failed to encode handshake frame"),
        }
    }
    room.broadcast(&client_id, &RelayMessage::PeerCount { count });

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let Some(msg) = protocol::decode(&bytes) else { continue };
                        handle_client_message(&state, &room_id, &room, &client_id, msg).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(room_id, client_id, error = %e, "socket error");
                        break;
                    }
                }
            }
            fanout = rx.recv() => {
                match fanout {
                    Ok(frame) => {
                        if frame.origin != client_id
                            && socket.send(WsMessage::Binary(frame.bytes)).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // A lagged member re-syncs from the room doc.
                        warn!(room_id, client_id, skipped, "member lagged, forcing resync");
                        let full = room.changes_since(&[]);
                        let msg = RelayMessage::SyncResponse { changes: vec![full] };
                        if let Ok(bytes) = protocol::encode(&msg) {
                            if socket.send(WsMessage::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        rx = rx.resubscribe();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    leave(&state, &room_id, &room).await;
    let count = room.peers.load(Ordering::SeqCst);
    room.broadcast(&client_id, &RelayMessage::PeerCount { count });
    info!(room_id, client_id, peers = count, "client left");
}

async fn handle_client_message(
    state: &Arc<RelayState>,
    room_id: &str,
    room: &Arc<Room>,
    client_id: &str,
    msg: RelayMessage,
) {
    match msg {
        RelayMessage::Update { origin, payload } => {
            if room.apply(&payload) {
                state.persist_update(room_id, &payload).await;
                room.broadcast(&origin, &RelayMessage::Update { origin: origin.clone(), payload });
            }
        }
        // The client's half of reconciliation: changes we asked for.
        RelayMessage::SyncResponse { changes } => {
            for payload in changes {
                if room.apply(&payload) {
                    state.persist_update(room_id, &payload).await;
                    room.broadcast(
                        client_id,
                        &RelayMessage::Update {
                            origin: client_id.to_string(),
                            payload,
                        },
                    );
                }
            }
        }
        RelayMessage::SyncRequest { heads } => {
            let missing = room.changes_since(&heads);
            let changes = if missing.is_empty() { vec![] } else { vec![missing] };
            room.broadcast("", &RelayMessage::SyncResponse { changes });
        }
        other => {
            debug!(room_id, client_id, ?other, "ignoring unexpected client frame");
        }
    }
}

async fn await_hello(socket: &mut WebSocket) -> Option<(String, Vec<String>)> {
    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(WsMessage::Binary(bytes)) => {
                return match protocol::decode(&bytes) {
                    Some(RelayMessage::Hello { client_id, heads }) => Some((client_id, heads)),
                    _ => {
                        warn!("first frame was not Hello, closing");
                        None
                    }
                };
            }
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn leave(state: &Arc<RelayState>, room_id: &str, room: &Arc<Room>) {
    let remaining = room.peers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    if remaining == 0 {
        state.compact_room(room_id, room).await;
    }
}

// --- Access gate endpoints ---

#[derive(Debug, Deserialize)]
struct InviteRequest {
    household: String,
}

#[derive(Debug, Serialize)]
struct InviteResponse {
    invite: String,
}

async fn issue_invite(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(req): Json<InviteRequest>,
) -> Response {
    let bearer = bearer_token(&headers).unwrap_or_default();
    match state.gate.issue_invite(&bearer, &req.household) {
        Ok(invite) => Json(InviteResponse { invite }).into_response(),
        Err(e) => (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    invite: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    household: String,
}

async fn login(State(state): State<Arc<RelayState>>, Json(req): Json<LoginRequest>) -> Response {
    match state.gate.redeem_invite(&req.invite, &req.name) {
        Ok(session) => Json(LoginResponse {
            token: session.token,
            household: session.household,
        })
        .into_response(),
        Err(e) => (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use automerge::transaction::Transactable;
    use axum::http::HeaderValue;

    fn empty_room() -> Room {
        let (tx, _rx) = broadcast::channel(8);
        Room {
            doc: StdMutex::new(AutoCommit::new()),
            tx,
            peers: AtomicUsize::new(0),
        }
    }

    #[test]
    fn corrupt_update_never_reaches_the_room_document() {
        let room = empty_room();
        assert!(!room.apply(b"junk frame bytes"));
        assert!(room.heads().is_empty());

        let mut src = AutoCommit::new();
        src.put(automerge::ROOT, "k", "v").unwrap();
        let payload = src.save();
        assert!(room.apply(&payload));
        assert!(!room.heads().is_empty());
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer admin-123"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("admin-123"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcg=="),
        );
        assert!(bearer_token(&headers).is_none());
    }
}
