//! Inbound routing for a peer.
//!
//! | Message                | Owned board                 | View                         |
//! |------------------------|-----------------------------|------------------------------|
//! | GET_BOARD_DATA         | reply BOARD_DATA            | ignored                      |
//! | BOARD_LISTEN / UNLISTEN| (un)subscribe the session   | ignored                      |
//! | BOARD_*_UPDATE         | CAS, broadcast on success   | ignored                      |
//! | BOARD_DATA             | ignored                     | overwrite, subscribe once    |
//! | BOARD_*_ACCEPTED       | ignored                     | overwrite                    |
//! | BOARD_DELETED          | ignored                     | discard                      |
//!
//! View state is only taken from the session we opened to the board's owner.
//! Directory announcements update the available list; BOARD_ERROR becomes a
//! [`PeerEvent::RemoteError`].

use slate_core::{BoardId, BoardSnapshot};

use crate::peer::{PeerEvent, WhiteboardPeer};
use crate::protocol::Message;
use crate::registry::SharedView;
use crate::transport::{Inbound, SessionEvent, SessionHandle};
use crate::worker::BoardHandle;

impl WhiteboardPeer {
    /// Handle one event from the inbound queue.
    pub(crate) async fn dispatch(&self, inbound: Inbound) {
        let Inbound { session, event } = inbound;
        match event {
            SessionEvent::Opened => {
                self.inner.sessions.write().await.insert(session.id(), session);
            }
            SessionEvent::Message(msg) => self.route(&session, msg).await,
            SessionEvent::Malformed(e) => {
                log::warn!("Discarding malformed frame from {}: {e}", session.remote());
            }
            SessionEvent::Closed => self.session_closed(&session).await,
        }
    }

    async fn route(&self, session: &SessionHandle, msg: Message) {
        match msg {
            Message::SharingBoard(id) => {
                if self.owns(&id) {
                    return;
                }
                if self.inner.registry.mark_available(id.clone()).await {
                    self.notify(PeerEvent::BoardAvailable(id));
                }
            }
            Message::UnsharingBoard(id) => {
                if self.inner.registry.withdraw(&id).await {
                    self.notify(PeerEvent::BoardWithdrawn(id));
                }
            }

            Message::GetBoardData(id) => {
                if let Some(handle) = self.owned_or_ignore(&id, "GET_BOARD_DATA").await {
                    if let Err(e) = handle.serve_snapshot(session.clone()).await {
                        log::warn!("{e}");
                    }
                }
            }
            Message::Listen(id) => {
                if let Some(handle) = self.owned_or_ignore(&id, "BOARD_LISTEN").await {
                    if let Err(e) = handle.subscribe(session.clone()).await {
                        log::warn!("{e}");
                    }
                }
            }
            Message::Unlisten(id) => {
                if let Some(handle) = self.owned_or_ignore(&id, "BOARD_UNLISTEN").await {
                    if let Err(e) = handle.unsubscribe(session.id()).await {
                        log::warn!("{e}");
                    }
                }
            }
            Message::Update(proposal) => {
                let kind = proposal.mutation.kind();
                if let Some(handle) = self.owned_or_ignore(&proposal.id, "update").await {
                    log::debug!(
                        "{} proposes {kind:?} on {} at version {}",
                        session.remote(),
                        proposal.id,
                        proposal.expected_version
                    );
                    if let Err(e) = handle.submit(proposal.expected_version, proposal.mutation).await {
                        log::warn!("{e}");
                    }
                }
            }

            Message::BoardData(snapshot) => self.overwrite_view(session, snapshot, true).await,
            Message::Accepted { snapshot, .. } => self.overwrite_view(session, snapshot, false).await,
            Message::Deleted(id) => {
                if self.from_owner(session, &id).await {
                    self.discard_view(&id).await;
                }
            }

            Message::Error(message) => {
                log::warn!("BOARD_ERROR from {}: {message}", session.remote());
                self.notify(PeerEvent::RemoteError {
                    remote: session.remote().to_string(),
                    message,
                });
            }
            other @ (Message::ShareBoard(_) | Message::UnshareBoard(_)) => {
                log::debug!("Ignoring {} from {}: not a directory", other.event(), session.remote());
            }
        }
    }

    async fn owned_or_ignore(&self, id: &BoardId, what: &str) -> Option<BoardHandle> {
        let handle = self.inner.registry.owned(id).await;
        if handle.is_none() {
            log::debug!("Ignoring {what} for {id}: not an owned board");
        }
        handle
    }

    /// True if `session` is our link to the owner of `id`.
    async fn from_owner(&self, session: &SessionHandle, id: &BoardId) -> bool {
        let linked = self.inner.registry.is_owner_link(&id.owner_addr(), session.id()).await;
        if !linked {
            log::debug!("Ignoring state of {id} from {}: not its owner", session.remote());
        }
        linked
    }

    /// Replace a view's state with the owner's. The first snapshot of a newly
    /// opened view subscribes it.
    async fn overwrite_view(&self, session: &SessionHandle, snapshot: BoardSnapshot, is_data: bool) {
        let id = snapshot.id.clone();
        if !self.from_owner(session, &id).await {
            return;
        }
        let Some(view) = self.inner.registry.view(&id).await else {
            log::debug!("Ignoring state of {id}: no view");
            return;
        };

        let (version, listen) = {
            let mut replica = view.write().await;
            if let Err(e) = replica.board.apply_snapshot(snapshot) {
                log::warn!("Rejected state for {id}: {e}");
                return;
            }
            (replica.board.version(), is_data && !replica.subscribed)
        };

        if listen {
            listen_when_queued(session.clone(), view, id.clone());
        }
        self.notify(PeerEvent::BoardUpdated { id, version });
    }

    async fn discard_view(&self, id: &BoardId) {
        if self.inner.registry.remove_view(id).await.is_some() {
            log::info!("Board {id} deleted by its owner");
            self.release_owner_link(&id.owner_addr()).await;
            self.notify(PeerEvent::BoardDiscarded(id.clone()));
        }
    }

    async fn session_closed(&self, session: &SessionHandle) {
        self.inner.sessions.write().await.remove(&session.id());

        for handle in self.inner.registry.owned_handles().await {
            if let Err(e) = handle.unsubscribe(session.id()).await {
                log::debug!("{e}");
            }
        }
        if let Some(addr) = self.inner.registry.drop_owner_session(session.id()).await {
            log::warn!("Lost connection to owner {addr}; its views may go stale");
        }
        {
            let mut directory = self.inner.directory.write().await;
            if directory.as_ref().is_some_and(|d| d.id() == session.id()) {
                log::warn!("Lost connection to the directory");
                *directory = None;
            }
        }

        self.notify(PeerEvent::SessionClosed {
            remote: session.remote().to_string(),
        });
    }
}

/// Send BOARD_LISTEN off the dispatcher and mark the view subscribed once it
/// is queued.
fn listen_when_queued(session: SessionHandle, view: SharedView, id: BoardId) {
    tokio::spawn(async move {
        match session.emit(&Message::Listen(id.clone())).await {
            Ok(()) => view.write().await.subscribed = true,
            Err(e) => log::warn!("Could not subscribe to {id}: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::protocol::Frame;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Duration};

    fn id() -> BoardId {
        BoardId::parse("10.0.0.1:9000:board1").unwrap()
    }

    fn snapshot(s: &str) -> BoardSnapshot {
        BoardSnapshot::parse(&format!("{}%{s}", id())).unwrap()
    }

    fn message(session: &SessionHandle, msg: Message) -> Inbound {
        Inbound {
            session: session.clone(),
            event: SessionEvent::Message(msg),
        }
    }

    async fn recv_message(rx: &mut mpsc::Receiver<Frame>) -> Message {
        let frame = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        Message::from_frame(&frame).unwrap()
    }

    /// A peer holding an unsubscribed view of `id()`, linked to its owner
    /// through a detached session.
    async fn peer_with_view(capacity: usize) -> (WhiteboardPeer, SharedView, SessionHandle, mpsc::Receiver<Frame>) {
        let (peer, _events) = WhiteboardPeer::start(PeerConfig::default()).await.unwrap();
        let view = peer.inner.registry.insert_view(id()).await.unwrap();
        let (owner, rx) = SessionHandle::detached(id().owner_addr(), capacity);
        peer.inner.registry.link_owner(id().owner_addr(), owner.clone()).await;
        (peer, view, owner, rx)
    }

    #[tokio::test]
    async fn test_view_subscribes_once_listen_is_queued() {
        let (peer, view, owner, mut rx) = peer_with_view(1).await;
        // Owner queue already full.
        owner.try_emit(&Message::GetBoardData(id())).unwrap();

        peer.dispatch(message(&owner, Message::BoardData(snapshot("2%A%B")))).await;
        assert_eq!(peer.board(&id()).await.unwrap().version(), 2);
        assert!(!view.read().await.subscribed);

        assert_eq!(recv_message(&mut rx).await, Message::GetBoardData(id()));
        assert_eq!(recv_message(&mut rx).await, Message::Listen(id()));
        timeout(Duration::from_secs(2), async {
            while !view.read().await.subscribed {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_from_other_sessions_is_ignored() {
        let (peer, _view, owner, _rx) = peer_with_view(8).await;
        let (stranger, _stranger_rx) = SessionHandle::detached("10.0.0.2:9000", 8);

        peer.dispatch(message(&owner, Message::BoardData(snapshot("1%A")))).await;
        peer.dispatch(message(&stranger, Message::BoardData(snapshot("5%X")))).await;
        peer.dispatch(message(&stranger, Message::Deleted(id()))).await;
        assert_eq!(peer.board(&id()).await.unwrap().serialize(), format!("{}%1%A", id()));

        peer.dispatch(message(&owner, Message::Deleted(id()))).await;
        assert!(peer.board(&id()).await.is_err());
        peer.shutdown().await;
    }
}
