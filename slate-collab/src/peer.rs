//! Application-facing whiteboard peer.
//!
//! A peer owns boards (each behind a [`BoardHandle`] worker), holds views of
//! boards owned elsewhere, and keeps one session to the directory plus one
//! per remote owner it reads from. Every inbound event of every session goes
//! through a single dispatcher task (see `session.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use slate_core::{Board, BoardId, EncodedPath, Mutation, Proposal};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broadcast::BroadcastStats;
use crate::config::{split_addr, PeerConfig};
use crate::error::CollabError;
use crate::protocol::Message;
use crate::registry::BoardRegistry;
use crate::transport::{self, Inbound, SessionHandle};
use crate::worker::{BoardHandle, ProposalOutcome};

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The directory announced a board we may open
    BoardAvailable(BoardId),
    /// The directory withdrew a board
    BoardWithdrawn(BoardId),
    /// A board we own or view changed
    BoardUpdated { id: BoardId, version: u64 },
    /// The owner deleted or unshared a board we were viewing
    BoardDiscarded(BoardId),
    /// BOARD_ERROR received from a remote
    RemoteError { remote: String, message: String },
    SessionClosed { remote: String },
}

pub(crate) struct PeerInner {
    pub(crate) config: PeerConfig,
    pub(crate) port: u16,
    pub(crate) registry: BoardRegistry,
    pub(crate) directory: RwLock<Option<SessionHandle>>,
    /// Every open session, inbound or outbound
    pub(crate) sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    pub(crate) inbound: mpsc::Sender<Inbound>,
    pub(crate) events: mpsc::Sender<PeerEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A running whiteboard peer. Cheap to clone.
#[derive(Clone)]
pub struct WhiteboardPeer {
    pub(crate) inner: Arc<PeerInner>,
}

impl WhiteboardPeer {
    /// Bind the listener, start the accept and dispatcher loops and connect
    /// to the directory if one is configured.
    pub async fn start(config: PeerConfig) -> Result<(Self, mpsc::Receiver<PeerEvent>), CollabError> {
        let directory = match &config.directory {
            Some(addr) => Some(split_addr(addr).ok_or_else(|| CollabError::InvalidAddress(addr.clone()))?),
            None => None,
        };
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();

        let (inbound_tx, mut inbound_rx) = mpsc::channel(config.dispatch_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));

        let peer = Self {
            inner: Arc::new(PeerInner {
                config: config.clone(),
                port,
                registry: BoardRegistry::new(),
                directory: RwLock::new(None),
                sessions: RwLock::new(HashMap::new()),
                inbound: inbound_tx.clone(),
                events: events_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let accept = {
            let capacity = config.session_queue_capacity;
            let inbound = inbound_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = transport::serve(listener, inbound, capacity).await {
                    log::error!("Peer listener stopped: {e}");
                }
            })
        };
        let dispatcher = {
            let peer = peer.clone();
            tokio::spawn(async move {
                while let Some(inbound) = inbound_rx.recv().await {
                    peer.dispatch(inbound).await;
                }
            })
        };
        peer.inner.tasks.lock().await.extend([accept, dispatcher]);
        log::info!("Peer listening on {}:{port}", config.host);

        if let Some((host, dir_port)) = directory {
            match transport::connect(&host, dir_port, inbound_tx, config.session_queue_capacity).await {
                Ok(session) => {
                    log::info!("Connected to directory at {host}:{dir_port}");
                    *peer.inner.directory.write().await = Some(session);
                }
                Err(e) => {
                    peer.shutdown().await;
                    return Err(e.into());
                }
            }
        }

        Ok((peer, events_rx))
    }

    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Port actually bound; differs from the configured one when that was 0.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub(crate) fn owns(&self, id: &BoardId) -> bool {
        id.is_owned_by(self.host(), self.port())
    }

    pub(crate) fn notify(&self, event: PeerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.inner.events.try_send(event) {
            log::warn!("Event queue full, dropped {event:?}");
        }
    }

    // --- owned boards ---

    /// Create an empty board owned by this peer.
    pub async fn create_board(&self) -> BoardId {
        let id = BoardId::generate(self.host(), self.port());
        let handle = BoardHandle::spawn(
            Board::new_owned(id.clone()),
            self.inner.config.board_queue_capacity,
            Some(self.inner.events.clone()),
        );
        self.inner.registry.insert_owned(handle).await;
        log::info!("Created board {id}");
        id
    }

    async fn owned_handle(&self, id: &BoardId) -> Result<BoardHandle, CollabError> {
        match self.inner.registry.owned(id).await {
            Some(handle) => Ok(handle),
            None if self.owns(id) => Err(CollabError::UnknownBoard(id.clone())),
            None => Err(CollabError::NotOwner(id.clone())),
        }
    }

    /// Share or unshare an owned board. Unsharing tells current viewers the
    /// board is gone.
    pub async fn set_shared(&self, id: &BoardId, shared: bool) -> Result<(), CollabError> {
        let handle = self.owned_handle(id).await?;
        let withdrawn = handle.set_shared(shared).await?;
        if withdrawn > 0 {
            log::info!("Board {id} withdrawn from {withdrawn} viewers");
        }

        let msg = if shared {
            Message::ShareBoard(id.clone())
        } else {
            Message::UnshareBoard(id.clone())
        };
        self.send_to_directory(&msg).await
    }

    async fn send_to_directory(&self, msg: &Message) -> Result<(), CollabError> {
        let directory = self.inner.directory.read().await.clone();
        match directory {
            Some(session) => Ok(session.emit(msg).await?),
            None => {
                log::debug!("No directory, {} kept local", msg.event());
                Ok(())
            }
        }
    }

    /// Delete a board. Owned boards are unshared and their viewers told;
    /// views are closed.
    pub async fn delete_board(&self, id: &BoardId) -> Result<(), CollabError> {
        let Some(handle) = self.inner.registry.remove_owned(id).await else {
            return self.close_board(id).await;
        };
        let last = handle.delete().await?;
        if last.is_shared() {
            self.send_to_directory(&Message::UnshareBoard(id.clone())).await?;
        }
        log::info!("Deleted board {id}");
        Ok(())
    }

    // --- views ---

    /// Open a view of a remote board: connect to its owner if needed and ask
    /// for a snapshot. The view subscribes once the snapshot arrives.
    pub async fn open_board(&self, id: &BoardId) -> Result<(), CollabError> {
        if self.owns(id) || self.inner.registry.insert_view(id.clone()).await.is_none() {
            return Err(CollabError::AlreadyOpen(id.clone()));
        }

        // Registered before the link is used: a link with views is never released.
        let requested = match self.owner_link(id).await {
            Ok(session) => session
                .emit(&Message::GetBoardData(id.clone()))
                .await
                .map_err(CollabError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = requested {
            self.inner.registry.remove_view(id).await;
            self.release_owner_link(&id.owner_addr()).await;
            return Err(e);
        }
        log::info!("Opened view of {id}");
        Ok(())
    }

    /// Session to the owner of `id`, connecting if there is none.
    async fn owner_link(&self, id: &BoardId) -> Result<SessionHandle, CollabError> {
        let addr = id.owner_addr();
        if let Some(session) = self.inner.registry.owner_session(&addr).await {
            return Ok(session);
        }
        let session = transport::connect(
            id.host(),
            id.port(),
            self.inner.inbound.clone(),
            self.inner.config.session_queue_capacity,
        )
        .await?;
        let linked = self.inner.registry.link_owner(addr, session.clone()).await;
        if linked != session {
            session.close();
        }
        Ok(linked)
    }

    /// Stop viewing a remote board.
    pub async fn close_board(&self, id: &BoardId) -> Result<(), CollabError> {
        let view = self
            .inner
            .registry
            .remove_view(id)
            .await
            .ok_or_else(|| CollabError::UnknownBoard(id.clone()))?;
        let subscribed = view.read().await.subscribed;

        let addr = id.owner_addr();
        if subscribed {
            if let Some(session) = self.inner.registry.owner_session(&addr).await {
                if let Err(e) = session.emit(&Message::Unlisten(id.clone())).await {
                    self.release_owner_link(&addr).await;
                    return Err(e.into());
                }
            }
        }
        self.release_owner_link(&addr).await;
        log::info!("Closed view of {id}");
        Ok(())
    }

    /// Close the link to the owner at `addr` once no view needs it.
    pub(crate) async fn release_owner_link(&self, addr: &str) {
        if self.inner.registry.has_views_of(addr).await {
            return;
        }
        if let Some(session) = self.inner.registry.take_owner_session(addr).await {
            log::info!("No views left on {addr}, closing link");
            session.close();
        }
    }

    // --- mutations ---

    /// Propose `mutation` against `expected_version`. Owned boards answer
    /// directly; views forward to the owner and learn the result from its
    /// broadcast.
    pub async fn propose(
        &self,
        id: &BoardId,
        mutation: Mutation,
        expected_version: u64,
    ) -> Result<ProposalOutcome, CollabError> {
        if let Some(handle) = self.inner.registry.owned(id).await {
            return handle.propose(expected_version, mutation).await;
        }
        if self.inner.registry.view(id).await.is_none() {
            return Err(CollabError::UnknownBoard(id.clone()));
        }

        let session = self
            .inner
            .registry
            .owner_session(&id.owner_addr())
            .await
            .ok_or_else(|| CollabError::OwnerUnreachable(id.clone()))?;
        let proposal = Proposal {
            id: id.clone(),
            expected_version,
            mutation,
        };
        session.emit(&Message::Update(proposal)).await?;
        Ok(ProposalOutcome::Forwarded)
    }

    async fn propose_at_current(&self, id: &BoardId, mutation: Mutation) -> Result<ProposalOutcome, CollabError> {
        let version = self.board(id).await?.version();
        self.propose(id, mutation, version).await
    }

    pub async fn add_path(&self, id: &BoardId, path: EncodedPath) -> Result<ProposalOutcome, CollabError> {
        self.propose_at_current(id, Mutation::AddPath(path)).await
    }

    pub async fn undo(&self, id: &BoardId) -> Result<ProposalOutcome, CollabError> {
        self.propose_at_current(id, Mutation::Undo).await
    }

    pub async fn clear(&self, id: &BoardId) -> Result<ProposalOutcome, CollabError> {
        self.propose_at_current(id, Mutation::Clear).await
    }

    // --- queries ---

    /// Copy of an owned board or a view.
    pub async fn board(&self, id: &BoardId) -> Result<Board, CollabError> {
        if let Some(handle) = self.inner.registry.owned(id).await {
            return handle.read().await;
        }
        match self.inner.registry.view(id).await {
            Some(view) => Ok(view.read().await.board.clone()),
            None => Err(CollabError::UnknownBoard(id.clone())),
        }
    }

    /// Broadcast statistics of an owned board.
    pub async fn board_stats(&self, id: &BoardId) -> Result<BroadcastStats, CollabError> {
        self.owned_handle(id).await?.stats().await
    }

    /// Ids of every owned board and view.
    pub async fn boards(&self) -> Vec<BoardId> {
        let mut ids: Vec<BoardId> = self
            .inner
            .registry
            .owned_handles()
            .await
            .iter()
            .map(|handle| handle.id().clone())
            .collect();
        ids.extend(self.inner.registry.view_ids().await);
        ids.sort();
        ids
    }

    /// Boards the directory lists as shared by other peers.
    pub async fn available_boards(&self) -> Vec<BoardId> {
        self.inner.registry.available().await
    }

    /// Delete every owned board, close every session and stop the loops.
    pub async fn shutdown(&self) {
        for handle in self.inner.registry.owned_handles().await {
            if let Err(e) = self.delete_board(handle.id()).await {
                log::warn!("Deleting {} on shutdown failed: {e}", handle.id());
            }
        }

        let sessions: Vec<SessionHandle> = self.inner.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
        for session in self.inner.registry.owner_sessions().await {
            session.close();
        }
        if let Some(directory) = self.inner.directory.write().await.take() {
            directory.close();
        }

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        log::info!("Peer {}:{} shut down", self.host(), self.port());
    }
}
