//! WebSocket transport: one task per connection, named events in both
//! directions.
//!
//! Architecture:
//! ```text
//!                     SessionHandle (cloneable)
//!                        │ emit / try_emit / close
//!                        ▼
//!  socket ◄── writer ◄── outgoing queue (bounded)
//!    │
//!    └──► reader ──► Inbound { session, event } ──► dispatcher queue (bounded)
//! ```
//!
//! Every connection, inbound or outbound, is driven by the same loop. Frames
//! are decoded at the edge: the dispatcher receives typed [`Message`]s, or a
//! [`SessionEvent::Malformed`] it can log and drop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::protocol::{Frame, Message, ProtocolError};

/// Transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    #[error("connection interrupted: {0}")]
    ConnectionInterrupted(String),
    #[error("outgoing queue full for {0}")]
    Backpressure(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// What a connection reports to its dispatcher.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection established; always the first event of a session
    Opened,
    Message(Message),
    /// A frame that could not be decoded; the session stays open
    Malformed(ProtocolError),
    /// Connection gone; always the last event of a session
    Closed,
}

/// An event tagged with the session it arrived on.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub session: SessionHandle,
    pub event: SessionEvent,
}

/// Sending half of one open connection.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    remote: Arc<str>,
    outgoing: mpsc::Sender<Frame>,
    closed: Arc<Notify>,
    closing: Arc<AtomicBool>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl SessionHandle {
    fn new(remote: impl Into<Arc<str>>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outgoing, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            remote: remote.into(),
            outgoing,
            closed: Arc::new(Notify::new()),
            closing: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// A session with no socket behind it: frames emitted on the handle come
    /// out of the returned receiver. Used for in-process wiring and tests.
    pub fn detached(remote: impl Into<Arc<str>>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        Self::new(remote, capacity)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote `host:port` as seen by the transport.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Queue a message, waiting for room in the outgoing queue.
    pub async fn emit(&self, msg: &Message) -> Result<(), TransportError> {
        log::trace!("{} → {}: {}", self.id, self.remote, msg.event());
        self.outgoing
            .send(msg.to_frame())
            .await
            .map_err(|_| TransportError::ConnectionInterrupted(self.remote.to_string()))
    }

    /// Queue an already built frame without waiting.
    pub fn try_emit_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.outgoing.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(self.remote.to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::ConnectionInterrupted(self.remote.to_string())
            }
        })
    }

    /// Queue a message without waiting.
    pub fn try_emit(&self, msg: &Message) -> Result<(), TransportError> {
        log::trace!("{} → {}: {}", self.id, self.remote, msg.event());
        self.try_emit_frame(msg.to_frame())
    }

    /// Queue a frame without waiting. A session too slow to take it is
    /// closed instead, so its stream never has a gap.
    pub fn deliver(&self, frame: Frame) -> Result<(), TransportError> {
        let result = self.try_emit_frame(frame);
        if let Err(TransportError::Backpressure(_)) = &result {
            log::warn!("Closing lagging session {} with {}", self.id, self.remote);
            self.close();
        }
        result
    }

    /// Ask the connection task to close the socket. Frames already queued
    /// still go out.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.closed.notify_one();
    }

    /// True once the connection is gone or a close was requested.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.outgoing.is_closed()
    }
}

/// Connect to the peer listening on `host:port`.
pub async fn connect(
    host: &str,
    port: u16,
    inbound: mpsc::Sender<Inbound>,
    capacity: usize,
) -> Result<SessionHandle, TransportError> {
    let addr = format!("{host}:{port}");
    let url = if host.contains(':') {
        format!("ws://[{host}]:{port}")
    } else {
        format!("ws://{addr}")
    };

    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| match e {
            tungstenite::Error::Io(io) => TransportError::HostUnreachable(format!("{addr}: {io}")),
            other => TransportError::ConnectionInterrupted(format!("{addr}: {other}")),
        })?;

    log::info!("Connected to {addr}");
    Ok(spawn_session(ws_stream, addr, inbound, capacity))
}

/// Accept WebSocket connections forever, spawning a session for each.
pub async fn serve(
    listener: TcpListener,
    inbound: mpsc::Sender<Inbound>,
    capacity: usize,
) -> Result<(), TransportError> {
    loop {
        let (stream, addr) = listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionInterrupted(e.to_string()))?;
        log::debug!("New TCP connection from {addr}");

        let inbound = inbound.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws_stream) => {
                    spawn_session(ws_stream, addr.to_string(), inbound, capacity);
                }
                Err(e) => log::warn!("WebSocket handshake with {addr} failed: {e}"),
            }
        });
    }
}

/// Drive an established WebSocket as a session.
pub fn spawn_session<S>(
    ws_stream: WebSocketStream<S>,
    remote: String,
    inbound: mpsc::Sender<Inbound>,
    capacity: usize,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outgoing) = SessionHandle::new(remote, capacity);
    tokio::spawn(drive(ws_stream, handle.clone(), outgoing, inbound));
    handle
}

async fn drive<S>(
    ws_stream: WebSocketStream<S>,
    session: SessionHandle,
    mut outgoing: mpsc::Receiver<Frame>,
    inbound: mpsc::Sender<Inbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let report = |event| Inbound {
        session: session.clone(),
        event,
    };

    if inbound.send(report(SessionEvent::Opened)).await.is_err() {
        return;
    }
    log::info!("Session {} with {} established", session.id, session.remote);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Binary(data))) => {
                        let event = match Message::decode(&data) {
                            Ok(message) => {
                                log::trace!("{} ← {}: {}", session.id, session.remote, message.event());
                                SessionEvent::Message(message)
                            }
                            Err(e) => SessionEvent::Malformed(e),
                        };
                        if inbound.send(report(event)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if ws_sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::info!("Connection closed by {}", session.remote);
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from {}: {e}", session.remote);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            frame = outgoing.recv() => {
                let Some(frame) = frame else { break };
                match frame.encode() {
                    Ok(bytes) => {
                        if let Err(e) = ws_sender.send(WsMessage::Binary(bytes.into())).await {
                            log::warn!("Send to {} failed: {e}", session.remote);
                            break;
                        }
                    }
                    Err(e) => log::error!("Dropping unencodable {} frame: {e}", frame.event),
                }
            }

            _ = session.closed.notified() => {
                // Frames queued before close() still go out.
                while let Ok(frame) = outgoing.try_recv() {
                    let Ok(bytes) = frame.encode() else { continue };
                    if ws_sender.send(WsMessage::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                log::info!("Session {} with {} closed locally", session.id, session.remote);
                break;
            }
        }
    }

    // Stop accepting frames before reporting, so emitters see the closure.
    outgoing.close();
    let _ = inbound.send(report(SessionEvent::Closed)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_core::BoardId;

    fn id() -> BoardId {
        BoardId::parse("127.0.0.1:1:b").unwrap()
    }

    #[tokio::test]
    async fn test_detached_session_delivers_frames() {
        let (session, mut rx) = SessionHandle::detached("test:1", 4);
        session.emit(&Message::Listen(id())).await.unwrap();
        session.try_emit(&Message::Unlisten(id())).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(Message::from_frame(&first).unwrap(), Message::Listen(id()));
        let second = rx.recv().await.unwrap();
        assert_eq!(Message::from_frame(&second).unwrap(), Message::Unlisten(id()));
        assert_eq!(session.remote(), "test:1");
    }

    #[tokio::test]
    async fn test_try_emit_backpressure() {
        let (session, _rx) = SessionHandle::detached("test:1", 1);
        session.try_emit(&Message::Listen(id())).unwrap();
        assert!(matches!(
            session.try_emit(&Message::Listen(id())),
            Err(TransportError::Backpressure(_))
        ));
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (session, rx) = SessionHandle::detached("test:1", 1);
        drop(rx);
        assert!(session.is_closed());
        assert!(matches!(
            session.emit(&Message::Listen(id())).await,
            Err(TransportError::ConnectionInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_deliver_closes_lagging_session() {
        let (session, mut rx) = SessionHandle::detached("test:1", 1);
        session.deliver(Message::Listen(id()).to_frame()).unwrap();
        assert!(!session.is_closed());

        assert!(matches!(
            session.deliver(Message::Unlisten(id()).to_frame()),
            Err(TransportError::Backpressure(_))
        ));
        assert!(session.is_closed());
        // What was queued before the close is kept.
        let frame = rx.recv().await.unwrap();
        assert_eq!(Message::from_frame(&frame).unwrap(), Message::Listen(id()));
    }

    #[test]
    fn test_session_identity() {
        let (a, _ra) = SessionHandle::detached("x", 1);
        let (b, _rb) = SessionHandle::detached("x", 1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::channel(4);
        let result = connect("127.0.0.1", port, tx, 4).await;
        assert!(matches!(result, Err(TransportError::HostUnreachable(_))));
    }

    #[tokio::test]
    async fn test_serve_and_connect_exchange_messages() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (server_tx, mut server_rx) = mpsc::channel(16);
        tokio::spawn(serve(listener, server_tx, 16));

        let (client_tx, mut client_rx) = mpsc::channel(16);
        let client = connect("127.0.0.1", port, client_tx, 16).await.unwrap();
        assert!(matches!(client_rx.recv().await.unwrap().event, SessionEvent::Opened));

        client.emit(&Message::GetBoardData(id())).await.unwrap();

        let opened = server_rx.recv().await.unwrap();
        assert!(matches!(opened.event, SessionEvent::Opened));
        let request = server_rx.recv().await.unwrap();
        match request.event {
            SessionEvent::Message(Message::GetBoardData(got)) => assert_eq!(got, id()),
            other => panic!("unexpected event {other:?}"),
        }

        request.session.emit(&Message::Deleted(id())).await.unwrap();
        match client_rx.recv().await.unwrap().event {
            SessionEvent::Message(Message::Deleted(got)) => assert_eq!(got, id()),
            other => panic!("unexpected event {other:?}"),
        }

        client.close();
        assert!(matches!(client_rx.recv().await.unwrap().event, SessionEvent::Closed));
        let closed = server_rx.recv().await.unwrap();
        assert!(matches!(closed.event, SessionEvent::Closed));
        assert_eq!(closed.session, request.session);
    }
}
