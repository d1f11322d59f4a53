//! Board directory: which boards are currently shared, announced to every
//! connected peer.
//!
//! ```text
//! owner ── SHARE_BOARD / UNSHARE_BOARD ──► DirectoryServer ──► Directory
//!                                                                 │
//!                      SHARING_BOARD / UNSHARING_BOARD ◄──────────┘
//!                      (every attached peer, owner included)
//! ```
//!
//! All events from all connections go through one dispatcher loop, so
//! announcements reach each peer in the order the directory applied them.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use slate_core::BoardId;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::error::CollabError;
use crate::protocol::Message;
use crate::transport::{self, Inbound, SessionEvent, SessionHandle};

/// Shared-board registry plus the peers that hear about it.
#[derive(Debug, Default)]
pub struct Directory {
    shared: RwLock<BTreeSet<BoardId>>,
    peers: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and tell it about every board shared so far.
    pub async fn attach(&self, session: SessionHandle) {
        let shared: Vec<BoardId> = self.shared.read().await.iter().cloned().collect();
        for id in shared {
            if let Err(e) = session.deliver(Message::SharingBoard(id).to_frame()) {
                log::warn!("Could not list shared boards to {}: {e}", session.remote());
                break;
            }
        }
        self.peers.write().await.insert(session.id(), session);
    }

    pub async fn detach(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.peers.write().await.remove(&session_id)
    }

    /// Mark `id` shared. Announces it only if it was not already listed.
    pub async fn share(&self, id: BoardId) -> bool {
        let added = self.shared.write().await.insert(id.clone());
        if added {
            log::info!("Board {id} shared");
            self.announce(&Message::SharingBoard(id)).await;
        }
        added
    }

    /// Withdraw `id`. Announces it only if it was listed.
    pub async fn unshare(&self, id: &BoardId) -> bool {
        let removed = self.shared.write().await.remove(id);
        if removed {
            log::info!("Board {id} unshared");
            self.announce(&Message::UnsharingBoard(id.clone())).await;
        }
        removed
    }

    /// Currently shared boards, in id order.
    pub async fn snapshot(&self) -> Vec<BoardId> {
        self.shared.read().await.iter().cloned().collect()
    }

    pub async fn is_shared(&self, id: &BoardId) -> bool {
        self.shared.read().await.contains(id)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Apply one message from `session`. Returns false if the directory does
    /// not serve this kind of request; the sender then gets BOARD_ERROR.
    pub async fn handle(&self, session: &SessionHandle, msg: Message) -> bool {
        match msg {
            Message::ShareBoard(id) => {
                self.share(id).await;
                true
            }
            Message::UnshareBoard(id) => {
                self.unshare(&id).await;
                true
            }
            other => {
                log::debug!("Directory rejecting {} from {}", other.event(), session.remote());
                let reply = Message::Error(format!("directory does not handle {}", other.event()));
                if let Err(e) = session.deliver(reply.to_frame()) {
                    log::debug!("Could not report error to {}: {e}", session.remote());
                }
                false
            }
        }
    }

    async fn announce(&self, msg: &Message) {
        let frame = msg.to_frame();
        let peers = self.peers.read().await;
        for session in peers.values().filter(|session| !session.is_closed()) {
            if let Err(e) = session.deliver(frame.clone()) {
                log::warn!("Could not announce {} to {}: {e}", msg.event(), session.remote());
            }
        }
    }
}

/// Directory server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_messages: u64,
    pub malformed_messages: u64,
    pub shared_boards: usize,
}

/// Network front of a [`Directory`].
pub struct DirectoryServer {
    config: DirectoryConfig,
    directory: Arc<Directory>,
    stats: Arc<RwLock<DirectoryStats>>,
}

impl DirectoryServer {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            directory: Arc::new(Directory::new()),
            stats: Arc::new(RwLock::new(DirectoryStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DirectoryConfig::default())
    }

    pub fn directory(&self) -> Arc<Directory> {
        self.directory.clone()
    }

    pub async fn stats(&self) -> DirectoryStats {
        let mut stats = self.stats.read().await.clone();
        stats.shared_boards = self.directory.shared.read().await.len();
        stats
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), CollabError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let addr: SocketAddr = listener.local_addr()?;
        log::info!("Directory server listening on {addr}");
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), CollabError> {
        let (tx, mut rx) = mpsc::channel(self.config.dispatch_capacity.max(1));
        let accept = transport::serve(listener, tx, self.config.session_queue_capacity);
        tokio::pin!(accept);

        loop {
            tokio::select! {
                result = &mut accept => {
                    log::error!("Directory listener stopped");
                    return result.map_err(CollabError::from);
                }
                Some(inbound) = rx.recv() => self.dispatch(inbound).await,
            }
        }
    }

    async fn dispatch(&self, inbound: Inbound) {
        let Inbound { session, event } = inbound;
        match event {
            SessionEvent::Opened => {
                {
                    let mut s = self.stats.write().await;
                    s.total_connections += 1;
                    s.active_connections += 1;
                }
                self.directory.attach(session).await;
            }
            SessionEvent::Message(msg) => {
                self.stats.write().await.total_messages += 1;
                if !self.directory.handle(&session, msg).await {
                    self.stats.write().await.rejected_messages += 1;
                }
            }
            SessionEvent::Malformed(e) => {
                log::warn!("Malformed frame from {}: {e}", session.remote());
                self.stats.write().await.malformed_messages += 1;
            }
            SessionEvent::Closed => {
                if self.directory.detach(session.id()).await.is_some() {
                    let mut s = self.stats.write().await;
                    s.active_connections = s.active_connections.saturating_sub(1);
                }
                log::info!("Peer {} left the directory", session.remote());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    fn id(name: &str) -> BoardId {
        BoardId::parse(&format!("10.0.0.1:9000:{name}")).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(Message::from_frame(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_share_announces_once() {
        let directory = Directory::new();
        let (peer, mut rx) = SessionHandle::detached("peer", 8);
        directory.attach(peer).await;

        assert!(directory.share(id("b1")).await);
        assert!(!directory.share(id("b1")).await);
        assert_eq!(drain(&mut rx), vec![Message::SharingBoard(id("b1"))]);
        assert_eq!(directory.snapshot().await, vec![id("b1")]);
    }

    #[tokio::test]
    async fn test_unshare_only_if_present() {
        let directory = Directory::new();
        let (peer, mut rx) = SessionHandle::detached("peer", 8);
        directory.attach(peer).await;

        assert!(!directory.unshare(&id("b1")).await);
        assert!(drain(&mut rx).is_empty());

        directory.share(id("b1")).await;
        assert!(directory.unshare(&id("b1")).await);
        assert_eq!(
            drain(&mut rx),
            vec![Message::SharingBoard(id("b1")), Message::UnsharingBoard(id("b1"))]
        );
        assert!(!directory.is_shared(&id("b1")).await);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_listing() {
        let directory = Directory::new();
        directory.share(id("b2")).await;
        directory.share(id("b1")).await;

        let (late, mut rx) = SessionHandle::detached("late", 8);
        directory.attach(late).await;
        assert_eq!(
            drain(&mut rx),
            vec![Message::SharingBoard(id("b1")), Message::SharingBoard(id("b2"))]
        );
    }

    #[tokio::test]
    async fn test_detached_peer_hears_nothing() {
        let directory = Directory::new();
        let (peer, mut rx) = SessionHandle::detached("peer", 8);
        directory.attach(peer.clone()).await;
        assert!(directory.detach(peer.id()).await.is_some());
        assert_eq!(directory.peer_count().await, 0);

        directory.share(id("b1")).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_lagging_peer_is_closed() {
        let directory = Directory::new();
        let (slow, mut rx_slow) = SessionHandle::detached("slow", 1);
        let (fast, mut rx_fast) = SessionHandle::detached("fast", 8);
        directory.attach(slow.clone()).await;
        directory.attach(fast).await;

        directory.share(id("b1")).await;
        directory.share(id("b2")).await;
        directory.unshare(&id("b1")).await;

        assert!(slow.is_closed());
        assert_eq!(drain(&mut rx_slow), vec![Message::SharingBoard(id("b1"))]);
        assert_eq!(
            drain(&mut rx_fast),
            vec![
                Message::SharingBoard(id("b1")),
                Message::SharingBoard(id("b2")),
                Message::UnsharingBoard(id("b1")),
            ]
        );
        // Still attached until its connection reports closed.
        assert_eq!(directory.peer_count().await, 2);
    }

    #[tokio::test]
    async fn test_unexpected_request_gets_error() {
        let directory = Directory::new();
        let (peer, mut rx) = SessionHandle::detached("peer", 8);

        assert!(!directory.handle(&peer, Message::GetBoardData(id("b1"))).await);
        match drain(&mut rx).as_slice() {
            [Message::Error(text)] => assert!(text.contains("GET_BOARD_DATA")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(directory.handle(&peer, Message::ShareBoard(id("b1"))).await);
        assert!(directory.is_shared(&id("b1")).await);
    }
}
