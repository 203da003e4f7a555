//! Live sync client.
//!
//! Holds one WebSocket open to the server. Inbound envelopes are applied to
//! the [`LocalVault`] as they arrive; local records go out through
//! [`SyncHandle::submit`], which commits to the vault first and only then
//! queues the envelope. Delivery is best effort: a failed send is logged and
//! never rolled back or retried.

use crate::error::{ClientError, Result};
use crate::local::{Applied, LocalVault};
use futures_util::{SinkExt, StreamExt};
use keeper_core::{Message, MessageType, Payload, SecretItem, Upserted};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsSink = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Header carrying the bearer token on the upgrade request.
const TOKEN_HEADER: &str = "token";

/// Events held for a handle owner that is not draining them. Beyond this,
/// new events are dropped; the vault is still updated.
pub const EVENT_BUFFER: usize = 256;

/// Something the receive loop did, reported to the owner of the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The initial snapshot was merged into the vault.
    Snapshot(usize),
    /// A record pushed by another device was stored.
    Applied {
        msg_type: MessageType,
        item: SecretItem,
    },
    /// The server sent an error envelope.
    Rejected(String),
    /// The connection is gone.
    Disconnected,
}

pub struct SyncClient;

impl SyncClient {
    /// Open a sync connection and start the background loop.
    pub async fn connect(url: &str, token: &str, vault: LocalVault) -> Result<SyncHandle> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {}", url, e)))?;
        let value = tungstenite::http::HeaderValue::from_str(token)
            .map_err(|_| ClientError::InvalidRequest("token is not a valid header value".into()))?;
        request.headers_mut().insert(TOKEN_HEADER, value);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (sink, source) = ws_stream.split();
        tracing::info!("Connected to {}", url);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(
            sink,
            source,
            vault.clone(),
            outbound_rx,
            events_tx,
            shutdown_rx,
        ));

        Ok(SyncHandle {
            token: token.to_string(),
            vault,
            outbound: outbound_tx,
            events: events_rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

pub struct SyncHandle {
    token: String,
    vault: LocalVault,
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::Receiver<SyncEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Save a record locally, then queue it for the server.
    ///
    /// Returns the normalized record as stored. Only local failures are
    /// errors; a dead connection is logged and the local write stands.
    pub fn submit(&self, item: &SecretItem) -> Result<SecretItem> {
        let (item, outcome) = self.vault.save_local(item)?;
        let msg_type = match outcome {
            Upserted::Inserted => MessageType::New,
            Upserted::Updated => MessageType::Update,
        };

        let message = Message::mutation(msg_type, &self.token, &item)?;
        if self.outbound.send(message).is_err() {
            tracing::warn!(
                "Sync connection closed, {} '{}' saved locally only",
                item.kind(),
                item.natural_key()
            );
        }
        Ok(item)
    }

    /// Wait for the next event. `None` once the loop has stopped and every
    /// event has been drained. At most [`EVENT_BUFFER`] undrained events are
    /// kept; later ones are dropped until the owner catches up.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    pub fn vault(&self) -> &LocalVault {
        &self.vault
    }

    /// Flush queued submissions, close the socket and wait for the loop.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| ClientError::Session(format!("Sync task failed: {}", e)))
    }
}

async fn run_loop(
    mut sink: WsSink,
    mut source: WsSource,
    vault: LocalVault,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::Sender<SyncEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            queued = outbound.recv() => {
                let Some(message) = queued else {
                    let _ = sink.send(tungstenite::Message::Close(None)).await;
                    break;
                };
                send_message(&mut sink, &message).await;
            }

            frame = source.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    handle_text(&vault, &text, &events);
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    tracing::info!("Server closed the sync connection");
                    break;
                }
                Some(Ok(tungstenite::Message::Binary(_))) => {
                    tracing::warn!("Ignoring binary frame from server");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Sync connection failed: {}", e);
                    break;
                }
            },

            _ = shutdown.changed() => {
                let _ = sink.send(tungstenite::Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
    emit(&events, SyncEvent::Disconnected);
}

/// Report an event without ever blocking the loop on a slow owner.
fn emit(events: &mpsc::Sender<SyncEvent>, event: SyncEvent) -> bool {
    match events.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::debug!("Event buffer full, dropping {:?}", event);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn send_message(sink: &mut WsSink, message: &Message) {
    let frame = match message.encode() {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Failed to encode {} envelope: {}", message.msg_type, e);
            return;
        }
    };
    if let Err(e) = sink.send(tungstenite::Message::Text(frame)).await {
        tracing::warn!("Failed to send {} envelope: {}", message.msg_type, e);
    }
}

fn handle_text(vault: &LocalVault, text: &str, events: &mpsc::Sender<SyncEvent>) {
    let message = match Message::decode(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Dropping undecodable frame from server: {}", e);
            return;
        }
    };
    let payload = match message.payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Dropping {} envelope with bad value: {}", message.msg_type, e);
            return;
        }
    };

    let event = match vault.apply(&payload) {
        Ok(Applied::Merged(n)) => {
            tracing::info!("Merged snapshot of {} records", n);
            SyncEvent::Snapshot(n)
        }
        Ok(Applied::Stored(_)) => match payload {
            Payload::New(item) => SyncEvent::Applied {
                msg_type: MessageType::New,
                item,
            },
            Payload::Update(item) => SyncEvent::Applied {
                msg_type: MessageType::Update,
                item,
            },
            _ => return,
        },
        Ok(Applied::Rejected(reason)) => {
            tracing::warn!("Server rejected the session: {}", reason);
            SyncEvent::Rejected(reason)
        }
        Err(e) => {
            tracing::error!("Failed to apply {} envelope: {}", message.msg_type, e);
            return;
        }
    };
    emit(events, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{Snapshot, Text};

    fn note(key: &str) -> SecretItem {
        Text {
            tag: "t".into(),
            key: key.into(),
            value: "v".into(),
            comment: String::new(),
            created: 1,
        }
        .into()
    }

    fn frame(item: &SecretItem) -> String {
        Message::mutation(MessageType::New, "", item)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn undrained_events_are_capped_but_vault_keeps_up() {
        let vault = LocalVault::in_memory().unwrap();
        let (tx, mut rx) = mpsc::channel(2);

        for i in 0..5 {
            handle_text(&vault, &frame(&note(&format!("k{}", i))), &tx);
        }
        assert_eq!(vault.all().unwrap().texts.len(), 5);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SyncEvent::Applied {
                    msg_type: MessageType::New,
                    item: note("k0"),
                },
                SyncEvent::Applied {
                    msg_type: MessageType::New,
                    item: note("k1"),
                },
            ]
        );

        assert!(emit(&tx, SyncEvent::Disconnected));
        drop(rx);
        assert!(!emit(&tx, SyncEvent::Disconnected));
    }

    #[test]
    fn snapshot_and_error_frames_become_events() {
        let vault = LocalVault::in_memory().unwrap();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let mut snapshot = Snapshot::default();
        snapshot.push(note("a"));
        snapshot.push(note("b"));
        let snap = Message::snapshot(&snapshot).unwrap().encode().unwrap();
        handle_text(&vault, &snap, &tx);
        handle_text(&vault, "{not json", &tx);
        handle_text(&vault, &Message::error("invalid token").encode().unwrap(), &tx);

        assert_eq!(rx.try_recv().unwrap(), SyncEvent::Snapshot(2));
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Rejected("invalid token".to_string())
        );
        assert!(rx.try_recv().is_err());
    }
}
