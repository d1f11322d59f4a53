//! Fan-out of committed mutations to a board's subscribers.
//!
//! A [`SubscriberSet`] lives inside the worker of the board it serves, so it
//! needs no locking of its own. Each message is framed once and cloned into
//! every subscriber's outgoing queue. A subscriber whose queue is full is
//! closed and evicted rather than stalling the board or missing a frame.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::Message;
use crate::transport::{SessionHandle, TransportError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub subscribers_evicted: u64,
    pub active_subscribers: usize,
}

/// Sessions subscribed to one owned board.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    sessions: HashMap<Uuid, SessionHandle>,
    messages_sent: u64,
    subscribers_evicted: u64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns false if it was already subscribed.
    pub fn add(&mut self, session: SessionHandle) -> bool {
        self.sessions.insert(session.id(), session).is_none()
    }

    pub fn remove(&mut self, session_id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(session_id)
    }

    pub fn contains(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send `msg` to every subscriber. Returns how many queues accepted it.
    ///
    /// Sessions whose connection is gone are dropped from the set; their
    /// `Closed` event may still be on its way to the dispatcher. A lagging
    /// session is closed and dropped too.
    pub fn broadcast(&mut self, msg: &Message) -> usize {
        let frame = msg.to_frame();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, session) in &self.sessions {
            if session.is_closed() {
                gone.push(*id);
                continue;
            }
            match session.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TransportError::Backpressure(_)) => {
                    self.subscribers_evicted += 1;
                    log::warn!("Evicted subscriber {} lagging on {}", session.remote(), msg.event());
                    gone.push(*id);
                }
                Err(_) => gone.push(*id),
            }
        }
        for id in gone {
            self.sessions.remove(&id);
        }

        self.messages_sent += 1;
        delivered
    }

    /// Remove every subscriber, returning them.
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            subscribers_evicted: self.subscribers_evicted,
            active_subscribers: self.sessions.len(),
        }
    }
}
