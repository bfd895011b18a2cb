//! WebSocket server for live editing sessions.
//!
//! Architecture:
//! ```text
//! Client A ──┐  ws://host/edit/{doc_id}   (X-User: alice)
//!            ├── handshake: identity + Read check
//! Client B ──┘        │
//!                     ▼
//!               EditRouter ── PresenceRegistry
//!                     │   └── DocumentStore ── SnapshotPublisher
//!                     ▼
//!               Topic (doc_id) ── broadcast ──┬── Client A
//!                                              └── Client B
//! ```
//!
//! Every routed message is published to the document's topic and reaches
//! every subscriber, the sender included. Rejections go back to the
//! sending socket only, as an error frame. A socket that joined and then
//! disconnects without a LEAVE gets one routed on its behalf.
//!
//! Access is checked at the handshake and then followed: when the user is
//! revoked or the document deleted, the session is closed with 1008 before
//! it can forward another frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{AccessChange, Frame, Topic, TopicRegistry};
use crate::error::CollabError;
use crate::model::{Actor, DocumentId};
use crate::presence::PresenceRegistry;
use crate::protocol::{EditMessage, ErrorFrame, MessageKind, ProtocolError};
use crate::router::EditRouter;
use crate::service::DocService;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

const EDIT_PATH_PREFIX: &str = "/edit/";
const USER_HEADER: &str = "x-user";

/// Realtime server configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per document
    pub broadcast_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_messages: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_handshakes: AtomicU64,
    total_messages: AtomicU64,
}

/// Shared by every connection task.
struct Shared {
    service: Arc<DocService>,
    router: EditRouter,
    presence: Arc<PresenceRegistry>,
    topics: TopicRegistry,
    stats: AtomicServerStats,
}

pub struct RealtimeServer {
    config: RealtimeConfig,
    shared: Arc<Shared>,
}

impl RealtimeServer {
    pub fn new(config: RealtimeConfig, service: Arc<DocService>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let router = service.edit_router(presence.clone());
        let topics = TopicRegistry::new(config.broadcast_capacity);
        Self {
            config,
            shared: Arc::new(Shared {
                service,
                router,
                presence,
                topics,
                stats: AtomicServerStats::default(),
            }),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Realtime server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn stats(&self) -> ServerStats {
        let s = &self.shared.stats;
        ServerStats {
            total_connections: s.total_connections.load(Ordering::Relaxed),
            active_connections: s.active_connections.load(Ordering::Relaxed),
            rejected_handshakes: s.rejected_handshakes.load(Ordering::Relaxed),
            total_messages: s.total_messages.load(Ordering::Relaxed),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.shared.presence
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), BoxError> {
        let mut session: Option<(DocumentId, Actor)> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            match parse_handshake(req) {
                Ok(found) => {
                    session = Some(found);
                    Ok(resp)
                }
                Err(rejection) => Err(rejection),
            }
        })
        .await;

        let mut ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                shared.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
                log::warn!("Rejected realtime handshake from {addr}: {e}");
                return Ok(());
            }
        };
        let Some((doc_id, actor)) = session else {
            return Ok(());
        };

        // Follow access changes from before the check, so a revoke that
        // lands right after it is still seen.
        let access_rx = shared.service.access_changes();

        // Authorize before subscribing: unknown or foreign documents never
        // get a topic.
        if let Err(e) = shared.service.get(doc_id, &actor).await {
            log::warn!("{actor} refused on doc {doc_id} from {addr}: {e}");
            ws.close(Some(close_frame(&e))).await?;
            return Ok(());
        }

        shared.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        shared.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("{actor} connected to doc {doc_id} from {addr}");

        let (topic, rx) = shared.topics.subscribe(doc_id).await;
        let (mut ws_sender, ws_receiver) = ws.split();
        let mut session = Session {
            doc_id,
            actor,
            joined: false,
            shared: &shared,
            topic: &topic,
        };
        let result = session.pump(&mut ws_sender, ws_receiver, rx, access_rx).await;

        // Implicit LEAVE for a socket that vanished mid-session.
        if session.joined {
            let leave = EditMessage::leave(session.actor.username());
            session.dispatch(&mut ws_sender, leave, false).await;
        }

        drop(topic);
        if shared.topics.remove_if_idle(doc_id).await {
            log::debug!("Topic for doc {doc_id} dropped (idle)");
        }
        shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection closed from {addr}");
        result
    }
}

/// Per-connection state.
struct Session<'a> {
    doc_id: DocumentId,
    actor: Actor,
    /// JOIN seen without a matching LEAVE
    joined: bool,
    shared: &'a Shared,
    topic: &'a Topic,
}

impl Session<'_> {
    async fn pump(
        &mut self,
        ws_sender: &mut WsSink,
        mut ws_receiver: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        mut rx: Receiver<Frame>,
        mut access_rx: Receiver<AccessChange>,
    ) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                // Checked first: a change announced before a frame was
                // published is seen before that frame.
                biased;

                // Lost access
                change = access_rx.recv() => {
                    let lost = match change {
                        Ok(change) if change.ends_session(self.doc_id, self.actor.username()) => {
                            Some(match change {
                                AccessChange::Revoked { .. } => CollabError::forbidden("access revoked"),
                                AccessChange::Deleted { .. } => CollabError::not_found("document"),
                            })
                        }
                        Ok(_) => None,
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Access feed lagged by {n} on doc {}; rechecking", self.doc_id);
                            self.shared
                                .service
                                .get(self.doc_id, &self.actor)
                                .await
                                .err()
                                .filter(|e| matches!(e, CollabError::NotFound(_) | CollabError::Forbidden(_)))
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if let Some(e) = lost {
                        log::info!("Closing {} on doc {}: {e}", self.actor, self.doc_id);
                        ws_sender.send(Message::Close(Some(close_frame(&e)))).await?;
                        break;
                    }
                }

                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.shared.stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            self.on_text(ws_sender, text.as_str()).await?;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            let err = ProtocolError::UnsupportedFrame("binary");
                            send_error(ws_sender, ErrorFrame::from(&err)).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::error!("WebSocket error on doc {}: {e}", self.doc_id);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                // Outgoing broadcast frame
                frame = rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            ws_sender.send(Message::text(frame.to_string())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("{} lagged by {n} messages on doc {}", self.actor, self.doc_id);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_text(&mut self, ws_sender: &mut WsSink, text: &str) -> Result<(), BoxError> {
        let mut msg = match EditMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Bad frame from {}: {e}", self.actor);
                return send_error(ws_sender, ErrorFrame::from(&e)).await;
            }
        };

        if msg.sender.is_empty() {
            msg.sender = self.actor.username().to_string();
        } else if msg.sender != self.actor.username() {
            let err = CollabError::forbidden("sender does not match connection identity");
            return send_error(ws_sender, ErrorFrame::from(&err)).await;
        }

        self.dispatch(ws_sender, msg, true).await;
        Ok(())
    }

    /// Route and publish. Errors are reported to this socket when
    /// `reply_errors` is set and the socket is still usable.
    async fn dispatch(&mut self, ws_sender: &mut WsSink, msg: EditMessage, reply_errors: bool) {
        let kind = msg.kind;
        let routed = self
            .shared
            .router
            .route_to(self.topic, self.doc_id, &self.actor, msg)
            .await;
        match routed {
            Ok(_) => match kind {
                MessageKind::Join => self.joined = true,
                MessageKind::Leave => self.joined = false,
                MessageKind::Edit | MessageKind::Cursor => {}
            },
            Err(e) => {
                log::debug!("{kind:?} from {} rejected on doc {}: {e}", self.actor, self.doc_id);
                if reply_errors {
                    if let Err(send_err) = send_error(ws_sender, ErrorFrame::from(&e)).await {
                        log::debug!("Could not report error to {}: {send_err}", self.actor);
                    }
                }
            }
        }
    }
}

/// 1008 for a missing or forbidden document, 1011 for anything else.
fn close_frame(e: &CollabError) -> CloseFrame {
    let (code, reason) = match e {
        CollabError::NotFound(_) => (CloseCode::Policy, "not found"),
        CollabError::Forbidden(_) => (CloseCode::Policy, "forbidden"),
        _ => (CloseCode::Error, "unavailable"),
    };
    CloseFrame {
        code,
        reason: reason.into(),
    }
}

async fn send_error(ws_sender: &mut WsSink, frame: ErrorFrame) -> Result<(), BoxError> {
    ws_sender.send(Message::text(frame.encode()?)).await?;
    Ok(())
}

/// Extract `(doc_id, actor)` from the upgrade request.
fn parse_handshake(req: &Request) -> Result<(DocumentId, Actor), ErrorResponse> {
    let doc_id = req
        .uri()
        .path()
        .strip_prefix(EDIT_PATH_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "expected /edit/{documentId}"))?;

    let header = req.headers().get(USER_HEADER).and_then(|v| v.to_str().ok());
    let actor = Actor::from_header(header)
        .map_err(|e| rejection(StatusCode::UNAUTHORIZED, &e.to_string()))?;

    Ok((doc_id, actor))
}

fn rejection(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http;

    fn request(path: &str, user: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(path);
        if let Some(user) = user {
            builder = builder.header("X-User", user);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_realtime_config_default() {
        let config = RealtimeConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_handshake_accepts_path_and_identity() {
        let id = Uuid::new_v4();
        let (doc_id, actor) = parse_handshake(&request(&format!("/edit/{id}"), Some("alice"))).unwrap();
        assert_eq!(doc_id, id);
        assert_eq!(actor.username(), "alice");
    }

    #[test]
    fn test_handshake_requires_identity() {
        let id = Uuid::new_v4();
        let err = parse_handshake(&request(&format!("/edit/{id}"), None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let err = parse_handshake(&request(&format!("/edit/{id}"), Some(""))).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_handshake_rejects_bad_path() {
        let err = parse_handshake(&request("/edit/not-a-uuid", Some("alice"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = parse_handshake(&request("/other", Some("alice"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
