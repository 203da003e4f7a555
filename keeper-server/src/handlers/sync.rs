//! Live sync over WebSocket.
//!
//! One session per device connection:
//!
//! 1. resolve the `token` header to a user, or send one `error` envelope and close
//! 2. register the connection and send the user's snapshot
//! 3. for every inbound `new`/`update`: re-check identity, validate, persist,
//!    then fan out to the user's other connections
//!
//! Steps 2 and the persist-and-fan-out of step 3 hold the user's ordering
//! lock from the registry, so the snapshot is always a device's first frame.
//!
//! [`run_session`] holds the protocol logic and works over any frame stream;
//! [`connect`] adapts an axum WebSocket to it.

use crate::error::TransportError;
use crate::keeper::Mutation;
use crate::registry::{ConnectionRegistry, Outbound, PeerHandle};
use crate::server::{AppState, SessionSettings};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, Stream, StreamExt};
use keeper_core::{Message, MessageType, Snapshot, TokenError, Upserted, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Header carrying the bearer token on the upgrade request.
pub const TOKEN_HEADER: &str = "token";

const INVALID_TOKEN: &str = "invalid token";

/// Transport-neutral inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// How a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connect-time token did not resolve to a user.
    Unauthenticated,
    /// A streamed message carried a token for no user or another user.
    InvalidToken,
    /// The peer closed the stream.
    PeerClosed,
    /// The server is shutting down.
    Shutdown,
}

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    ws.max_message_size(state.session.max_message_size)
        .on_failed_upgrade(|e| tracing::warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| serve_socket(socket, state, token))
}

async fn serve_socket(socket: WebSocket, state: AppState, token: String) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.session.outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        tracing::debug!("WebSocket write failed: {}", e);
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let inbound = stream.map(|frame| match frame {
        Ok(WsMessage::Text(text)) => Frame::Text(text.as_str().to_owned()),
        Ok(WsMessage::Binary(data)) => Frame::Binary(data.to_vec()),
        Ok(WsMessage::Ping(_)) => Frame::Ping,
        Ok(WsMessage::Pong(_)) => Frame::Pong,
        Ok(WsMessage::Close(_)) => Frame::Close,
        Err(e) => {
            tracing::debug!("WebSocket read failed: {}", e);
            Frame::Close
        }
    });

    let end = run_session(state, token, inbound, tx).await;
    tracing::debug!("Session finished: {:?}", end);
    let _ = writer.await;
}

/// Drive one device session to completion.
///
/// Frames from `inbound` are handled strictly in order. Everything for the
/// device, including broadcasts from sibling sessions, goes out on `outbound`.
pub async fn run_session<S>(
    state: AppState,
    token: String,
    mut inbound: S,
    outbound: mpsc::Sender<Outbound>,
) -> SessionEnd
where
    S: Stream<Item = Frame> + Unpin,
{
    let timeout = state.session.broadcast_timeout;

    let user_id = match state.tokens.validate(&token) {
        Ok(id) => id,
        Err(e) => {
            tracing::info!("Rejected sync connection: {}", e);
            reject(&outbound, timeout).await;
            return SessionEnd::Unauthenticated;
        }
    };

    let peer = Arc::new(PeerHandle::new(user_id, outbound));
    let order = state.registry.user_lock(user_id);
    let registration = {
        let _ordered = order.lock().await;
        let registration = state.registry.register(Arc::clone(&peer));
        send_snapshot(&state, &peer).await;
        registration
    };
    tracing::info!(
        "Device connected: user {} conn {} ({} live)",
        user_id,
        peer.id(),
        state.registry.count(user_id)
    );

    let mut shutdown = state.shutdown.clone();
    if *shutdown.borrow() {
        peer.close();
        return SessionEnd::Shutdown;
    }

    let end = loop {
        let frame = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    peer.close();
                    break SessionEnd::Shutdown;
                }
                continue;
            }
            frame = inbound.next() => frame,
        };

        let text = match frame {
            None | Some(Frame::Close) => break SessionEnd::PeerClosed,
            Some(Frame::Ping) | Some(Frame::Pong) => continue,
            Some(Frame::Binary(_)) => {
                tracing::warn!("Ignoring binary frame on conn {}", peer.id());
                continue;
            }
            Some(Frame::Text(text)) => text,
        };

        let message = match Message::decode(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame on conn {}: {}", peer.id(), e);
                continue;
            }
        };

        if let Err(e) = check_identity(&state, &message.token, user_id) {
            tracing::warn!("Rejected message on conn {}, closing: {}", peer.id(), e);
            reject_peer(&peer, timeout).await;
            break SessionEnd::InvalidToken;
        }

        let mutation = match state.keeper.validate(&message) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Dropping {} from conn {}: {}", message.msg_type, peer.id(), e);
                continue;
            }
        };

        let _ordered = order.lock().await;
        let outcome = match state.keeper.save(user_id, &mutation) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(
                    "Failed to persist {} for user {}: {}",
                    mutation.item.kind(),
                    user_id,
                    e
                );
                continue;
            }
        };

        let applied = Mutation {
            msg_type: applied_type(outcome),
            item: mutation.item,
        };
        broadcast(&state.registry, &peer, &applied, &state.session).await;
    };

    drop(registration);
    tracing::info!("Device disconnected: user {} conn {} ({:?})", user_id, peer.id(), end);
    end
}

/// Peers learn what actually happened: a `new` for an existing key is an update.
fn applied_type(outcome: Upserted) -> MessageType {
    match outcome {
        Upserted::Inserted => MessageType::New,
        Upserted::Updated => MessageType::Update,
    }
}

/// Every streamed message must carry a live token for the session's user.
fn check_identity(state: &AppState, token: &str, user_id: UserId) -> Result<(), TokenError> {
    match state.tokens.validate(token)? {
        id if id == user_id => Ok(()),
        _ => Err(TokenError::WrongSubject),
    }
}

async fn send_snapshot(state: &AppState, peer: &PeerHandle) {
    let snapshot = state.keeper.snapshot(peer.user_id()).unwrap_or_else(|e| {
        tracing::error!("Snapshot for user {} failed: {}", peer.user_id(), e);
        Snapshot::default()
    });

    let frame = match Message::snapshot(&snapshot).and_then(|m| m.encode()) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Failed to encode snapshot: {}", e);
            return;
        }
    };
    if let Err(e) = peer.send(frame, state.session.broadcast_timeout).await {
        tracing::warn!("Failed to send snapshot to conn {}: {}", peer.id(), e);
    } else {
        tracing::debug!("Sent {} records to conn {}", snapshot.len(), peer.id());
    }
}

fn error_frame() -> Option<String> {
    Message::error(INVALID_TOKEN).encode().ok()
}

async fn reject(outbound: &mpsc::Sender<Outbound>, timeout: std::time::Duration) {
    if let Some(frame) = error_frame() {
        let _ = outbound.send_timeout(Outbound::Frame(frame), timeout).await;
    }
    let _ = outbound.try_send(Outbound::Close);
}

async fn reject_peer(peer: &PeerHandle, timeout: std::time::Duration) {
    if let Some(frame) = error_frame() {
        let _ = peer.send(frame, timeout).await;
    }
    peer.close();
}

/// Deliver a mutation to the user's live connections. The origin is skipped
/// unless echo is enabled. Returns how many connections accepted the frame.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    origin: &PeerHandle,
    mutation: &Mutation,
    settings: &SessionSettings,
) -> usize {
    let frame = match mutation.to_message().and_then(|m| m.encode()) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Failed to encode broadcast: {}", e);
            return 0;
        }
    };

    let mut delivered = 0;
    for peer in registry.connections_for(origin.user_id()) {
        if peer.id() == origin.id() && !settings.echo_to_origin {
            continue;
        }
        match peer.send(frame.clone(), settings.broadcast_timeout).await {
            Ok(()) => delivered += 1,
            Err(TransportError::TimedOut) => {
                tracing::warn!("Broadcast to conn {} timed out", peer.id());
            }
            Err(TransportError::Closed) => {
                tracing::debug!("Broadcast to conn {} skipped, connection gone", peer.id());
            }
        }
    }
    delivered
}
