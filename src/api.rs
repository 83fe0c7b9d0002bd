use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::history::HistoryBuffer;
use crate::model::Message;
use crate::presence::{self, BroadcastScheduler, ROOM_LIST_DEBOUNCE};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{ConnId, ConnectionRegistry};
use crate::relay::{self, SignalKind};
use crate::rooms::{EventError, JoinOutcome, RoomDirectory};

/// All mutable server state. One lock guards the whole thing; every event
/// handler runs its mutation to completion under it, so operations are
/// atomic with respect to other connections' events.
#[derive(Default)]
pub struct Shared {
    pub registry: ConnectionRegistry,
    pub rooms: RoomDirectory,
    pub history: HistoryBuffer,
}

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<Mutex<Shared>>,
    pub scheduler: BroadcastScheduler,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            scheduler: BroadcastScheduler::new(),
            config,
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.origin.as_deref());
    Router::new()
        .route("/api/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> tower_http::cors::CorsLayer {
    use tower_http::cors::CorsLayer;
    match origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new().allow_origin(value),
            Err(_) => {
                warn!(origin, "invalid origin in config, leaving policy open");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    state.shared.lock().registry.insert(conn, tx);
    info!(%conn, "client connected");

    let (mut sink, mut stream) = socket.split();
    let mut outbound = UnboundedReceiverStream::new(rx);
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.next().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_event(&state, conn, event),
                Err(err) => debug!(%conn, %err, "dropping malformed frame"),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    handle_disconnect(&state, conn);
}

fn handle_event(state: &AppState, conn: ConnId, event: ClientEvent) {
    match event {
        ClientEvent::Join { name, room, secret } => join(state, conn, name, room, secret),
        ClientEvent::JoinRequest { name, room } => request_access(state, conn, name, room),
        ClientEvent::ApproveRequest { requester, room } => {
            resolve_request(state, conn, requester, room, true)
        }
        ClientEvent::DenyRequest { requester, room } => {
            resolve_request(state, conn, requester, room, false)
        }
        ClientEvent::GetRooms => {
            let shared = state.shared.lock();
            let list = presence::room_list(&shared.registry, &shared.rooms);
            shared.registry.send(conn, ServerEvent::RoomList(list));
        }
        ClientEvent::Message(message) => {
            let mut shared = state.shared.lock();
            let Shared {
                registry, history, ..
            } = &mut *shared;
            if let Err(err) = relay::relay_message(registry, history, conn, message) {
                debug!(%conn, %err, "dropping message");
            }
        }
        ClientEvent::Offer(payload) => signal(state, conn, SignalKind::Offer, payload),
        ClientEvent::Answer(payload) => signal(state, conn, SignalKind::Answer, payload),
        ClientEvent::IceCandidate(payload) => {
            signal(state, conn, SignalKind::IceCandidate, payload)
        }
        ClientEvent::Typing => typing(state, conn, false),
        ClientEvent::StopTyping => typing(state, conn, true),
        ClientEvent::Reaction {
            message_id,
            emoji,
            name,
        } => {
            let mut shared = state.shared.lock();
            let Shared {
                registry, history, ..
            } = &mut *shared;
            if let Err(err) = relay::apply_reaction(registry, history, conn, message_id, emoji, name)
            {
                debug!(%conn, %err, "dropping reaction");
            }
        }
    }
}

fn signal(state: &AppState, conn: ConnId, kind: SignalKind, payload: serde_json::Value) {
    let shared = state.shared.lock();
    if let Err(err) = relay::relay_signal(&shared.registry, conn, kind, payload) {
        debug!(%conn, %err, "dropping signal");
    }
}

fn typing(state: &AppState, conn: ConnId, stopped: bool) {
    let shared = state.shared.lock();
    if let Err(err) = relay::relay_typing(&shared.registry, conn, stopped) {
        debug!(%conn, %err, "dropping typing indicator");
    }
}

fn join(state: &AppState, conn: ConnId, name: String, room: String, secret: Option<String>) {
    let mut shared = state.shared.lock();
    // display names are fixed after the first successful join
    let name = shared
        .registry
        .name_of(conn)
        .map(str::to_string)
        .unwrap_or(name);

    let outcome = shared.rooms.evaluate_join(&name, &room, secret.as_deref());
    match outcome {
        JoinOutcome::Rejected(err) => {
            info!(%conn, %name, %room, reason = %err, "join rejected");
            shared.registry.send(
                conn,
                ServerEvent::JoinError {
                    reason: err.to_string(),
                },
            );
            return;
        }
        ref outcome => info!(%conn, %name, %room, ?outcome, "join admitted"),
    }

    // a connection is in at most one room; switching rooms leaves the old one
    if let Some(previous) = shared.registry.current_room(conn).map(str::to_string) {
        if previous != room {
            leave_room(&mut shared, conn);
        }
    }
    shared.registry.set_identity(conn, name.clone(), room.clone());

    let snapshot = shared.history.snapshot(&room);
    shared
        .registry
        .send(conn, ServerEvent::MessageHistory(snapshot));
    shared.registry.broadcast_room(
        &room,
        Some(conn),
        ServerEvent::PeerJoined { name: name.clone() },
    );
    shared.registry.broadcast_room(
        &room,
        Some(conn),
        ServerEvent::Message(Message::system(format!("{name} has joined the room"))),
    );
    let users = shared.registry.names_in(&room);
    shared
        .registry
        .broadcast_room(&room, None, ServerEvent::RoomUsers(users));
    drop(shared);
    schedule_room_list(state);
}

fn request_access(state: &AppState, conn: ConnId, name: String, room: String) {
    let mut shared = state.shared.lock();
    if shared.rooms.is_private(&room) {
        info!(%conn, %name, %room, "join request recorded");
        shared.rooms.record_request(&room, conn, name.clone());
        shared.registry.broadcast_room(
            &room,
            None,
            ServerEvent::JoinRequestReceived {
                name,
                requester: conn,
            },
        );
        shared.registry.send(conn, ServerEvent::JoinRequestPending);
    } else {
        // public or nonexistent rooms need no approval
        shared
            .registry
            .send(conn, ServerEvent::RequestApproved { room });
    }
}

fn resolve_request(state: &AppState, conn: ConnId, requester: ConnId, room: String, approve: bool) {
    let mut shared = state.shared.lock();
    if !shared.registry.is_member(conn, &room) {
        debug!(%conn, %room, err = %EventError::UnauthorizedApproval, "dropping resolution");
        return;
    }
    let Some(name) = shared.rooms.resolve_request(&room, requester, approve) else {
        debug!(%conn, %requester, %room, "no pending request to resolve");
        return;
    };
    info!(%conn, %requester, %name, %room, approve, "join request resolved");
    if approve {
        shared
            .registry
            .send(requester, ServerEvent::RequestApproved { room });
    } else {
        shared.registry.send(
            requester,
            ServerEvent::JoinError {
                reason: "Join request denied".into(),
            },
        );
    }
}

/// Unbind a connection from its room, announce the departure and drop the
/// room's metadata and history once it empties out.
fn leave_room(shared: &mut Shared, conn: ConnId) -> bool {
    let Some((name, room)) = shared.registry.clear_room(conn) else {
        return false;
    };
    shared.registry.broadcast_room(
        &room,
        None,
        ServerEvent::Message(Message::system(format!("{name} has left the room"))),
    );
    let users = shared.registry.names_in(&room);
    shared
        .registry
        .broadcast_room(&room, None, ServerEvent::RoomUsers(users));
    if shared.registry.members_of(&room).is_empty() {
        shared.rooms.remove(&room);
        shared.history.remove_room(&room);
    }
    true
}

fn handle_disconnect(state: &AppState, conn: ConnId) {
    let mut shared = state.shared.lock();
    let left = leave_room(&mut shared, conn);
    shared.registry.remove(conn);
    info!(%conn, "client disconnected");
    drop(shared);
    if left {
        schedule_room_list(state);
    }
}

fn schedule_room_list(state: &AppState) {
    let shared = state.shared.clone();
    state.scheduler.schedule(ROOM_LIST_DEBOUNCE, move || {
        let shared = shared.lock();
        let list = presence::room_list(&shared.registry, &shared.rooms);
        shared.registry.broadcast_all(ServerEvent::RoomList(list));
    });
}

/// Run the server bound to the configured address.
pub async fn run_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config);
    info!(%addr, "signaling server listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
