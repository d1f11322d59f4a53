//! Local bookkeeping of a peer: owned boards, views of remote boards, the
//! directory listing and the sessions to board owners.
//!
//! Each map has its own lock and no lock is held across a network await.
//! Views carry their own lock so one slow view never blocks another.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use slate_core::{Board, BoardId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::transport::SessionHandle;
use crate::worker::BoardHandle;

/// Local replica of a board owned elsewhere.
#[derive(Debug)]
pub struct ViewReplica {
    pub board: Board,
    /// Set once the first snapshot arrived and BOARD_LISTEN went out
    pub subscribed: bool,
}

pub type SharedView = Arc<RwLock<ViewReplica>>;

#[derive(Debug, Default)]
pub struct BoardRegistry {
    owned: RwLock<BTreeMap<BoardId, BoardHandle>>,
    views: RwLock<BTreeMap<BoardId, SharedView>>,
    available: RwLock<BTreeSet<BoardId>>,
    /// Owner address (`host:port`) → session we opened to it
    owners: RwLock<HashMap<String, SessionHandle>>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- owned boards ---

    pub async fn insert_owned(&self, handle: BoardHandle) {
        self.owned.write().await.insert(handle.id().clone(), handle);
    }

    pub async fn owned(&self, id: &BoardId) -> Option<BoardHandle> {
        self.owned.read().await.get(id).cloned()
    }

    pub async fn remove_owned(&self, id: &BoardId) -> Option<BoardHandle> {
        self.owned.write().await.remove(id)
    }

    pub async fn owned_handles(&self) -> Vec<BoardHandle> {
        self.owned.read().await.values().cloned().collect()
    }

    // --- views ---

    /// Insert an empty, unsubscribed view. Returns None if one exists.
    pub async fn insert_view(&self, id: BoardId) -> Option<SharedView> {
        let mut views = self.views.write().await;
        if views.contains_key(&id) {
            return None;
        }
        let view = Arc::new(RwLock::new(ViewReplica {
            board: Board::new_view(id.clone()),
            subscribed: false,
        }));
        views.insert(id, view.clone());
        Some(view)
    }

    pub async fn view(&self, id: &BoardId) -> Option<SharedView> {
        self.views.read().await.get(id).cloned()
    }

    pub async fn remove_view(&self, id: &BoardId) -> Option<SharedView> {
        self.views.write().await.remove(id)
    }

    pub async fn view_ids(&self) -> Vec<BoardId> {
        self.views.read().await.keys().cloned().collect()
    }

    /// Whether any view is of a board owned at `addr`.
    pub async fn has_views_of(&self, addr: &str) -> bool {
        self.views.read().await.keys().any(|id| id.owner_addr() == addr)
    }

    // --- directory listing ---

    /// Returns true if `id` was not listed before.
    pub async fn mark_available(&self, id: BoardId) -> bool {
        self.available.write().await.insert(id)
    }

    /// Returns true if `id` was listed.
    pub async fn withdraw(&self, id: &BoardId) -> bool {
        self.available.write().await.remove(id)
    }

    pub async fn available(&self) -> Vec<BoardId> {
        self.available.read().await.iter().cloned().collect()
    }

    // --- owner sessions ---

    /// Open session to the peer at `addr`, if any.
    pub async fn owner_session(&self, addr: &str) -> Option<SessionHandle> {
        self.owners
            .read()
            .await
            .get(addr)
            .filter(|session| !session.is_closed())
            .cloned()
    }

    /// Register `session` as the link to `addr` unless an open one is already
    /// there. Returns the link to use.
    pub async fn link_owner(&self, addr: String, session: SessionHandle) -> SessionHandle {
        let mut owners = self.owners.write().await;
        match owners.get(&addr) {
            Some(existing) if !existing.is_closed() => existing.clone(),
            _ => {
                owners.insert(addr, session.clone());
                session
            }
        }
    }

    /// Whether `session_id` is the link registered for `addr`, closing or not.
    pub async fn is_owner_link(&self, addr: &str, session_id: Uuid) -> bool {
        self.owners
            .read()
            .await
            .get(addr)
            .is_some_and(|session| session.id() == session_id)
    }

    pub async fn take_owner_session(&self, addr: &str) -> Option<SessionHandle> {
        self.owners.write().await.remove(addr)
    }

    /// Forget `session_id` as an owner link. Returns the address it served.
    pub async fn drop_owner_session(&self, session_id: Uuid) -> Option<String> {
        let mut owners = self.owners.write().await;
        let addr = owners
            .iter()
            .find(|(_, session)| session.id() == session_id)
            .map(|(addr, _)| addr.clone())?;
        owners.remove(&addr);
        Some(addr)
    }

    pub async fn owner_sessions(&self) -> Vec<SessionHandle> {
        self.owners.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> BoardId {
        BoardId::parse(&format!("10.0.0.1:9000:{name}")).unwrap()
    }

    #[tokio::test]
    async fn test_views_are_unique() {
        let registry = BoardRegistry::new();
        let view = registry.insert_view(id("b1")).await.unwrap();
        assert!(registry.insert_view(id("b1")).await.is_none());

        {
            let replica = view.read().await;
            assert!(!replica.subscribed);
            assert!(!replica.board.is_owned());
            assert_eq!(replica.board.version(), 0);
        }
        assert_eq!(registry.view_ids().await, vec![id("b1")]);
        assert!(registry.remove_view(&id("b1")).await.is_some());
        assert!(registry.view(&id("b1")).await.is_none());
    }

    #[tokio::test]
    async fn test_available_listing() {
        let registry = BoardRegistry::new();
        assert!(registry.mark_available(id("b2")).await);
        assert!(registry.mark_available(id("b1")).await);
        assert!(!registry.mark_available(id("b1")).await);
        assert_eq!(registry.available().await, vec![id("b1"), id("b2")]);

        assert!(registry.withdraw(&id("b1")).await);
        assert!(!registry.withdraw(&id("b1")).await);
        assert_eq!(registry.available().await, vec![id("b2")]);
    }

    #[tokio::test]
    async fn test_owner_sessions() {
        let registry = BoardRegistry::new();
        let (session, rx) = SessionHandle::detached("10.0.0.1:9000", 4);
        let linked = registry.link_owner("10.0.0.1:9000".to_string(), session.clone()).await;
        assert_eq!(linked, session);
        assert_eq!(registry.owner_session("10.0.0.1:9000").await, Some(session.clone()));

        // A closed link is never handed out.
        drop(rx);
        assert!(registry.owner_session("10.0.0.1:9000").await.is_none());

        assert_eq!(
            registry.drop_owner_session(session.id()).await.as_deref(),
            Some("10.0.0.1:9000")
        );
        assert!(registry.drop_owner_session(session.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_owner_link_bookkeeping() {
        let registry = BoardRegistry::new();
        let (link, _rx) = SessionHandle::detached("10.0.0.1:9000", 4);
        let (other, _rx_other) = SessionHandle::detached("10.0.0.1:9000", 4);
        registry.link_owner("10.0.0.1:9000".to_string(), link.clone()).await;
        // A second connection to the same owner loses to the open one.
        assert_eq!(registry.link_owner("10.0.0.1:9000".to_string(), other.clone()).await, link);
        assert!(registry.is_owner_link("10.0.0.1:9000", link.id()).await);
        assert!(!registry.is_owner_link("10.0.0.1:9000", other.id()).await);
        assert!(!registry.is_owner_link("10.0.0.2:9000", link.id()).await);

        assert!(!registry.has_views_of("10.0.0.1:9000").await);
        registry.insert_view(id("b1")).await;
        assert!(registry.has_views_of("10.0.0.1:9000").await);
        assert!(!registry.has_views_of("10.0.0.1:9001").await);

        assert_eq!(registry.take_owner_session("10.0.0.1:9000").await, Some(link));
        assert!(registry.take_owner_session("10.0.0.1:9000").await.is_none());
    }

    #[tokio::test]
    async fn test_owned_handles() {
        let registry = BoardRegistry::new();
        let handle = BoardHandle::spawn(Board::new_owned(id("b1")), 4, None);
        registry.insert_owned(handle).await;
        assert!(registry.owned(&id("b1")).await.is_some());
        assert_eq!(registry.owned_handles().await.len(), 1);
        assert!(registry.remove_owned(&id("b1")).await.is_some());
        assert!(registry.owned(&id("b1")).await.is_none());
    }
}
