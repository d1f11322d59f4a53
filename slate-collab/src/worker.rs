//! Per-board worker owning the canonical replica of an owned board.
//!
//! ```text
//! dispatcher ─┐
//! local API ──┼──► BoardCommand queue (bounded) ──► BoardWorker
//!             │                                      ├── Board (CAS)
//!             │                                      └── SubscriberSet ──► BOARD_*_ACCEPTED
//! ```
//!
//! Commands are handled one at a time and never await, so a CAS check, its
//! apply and the resulting broadcast are atomic with respect to every other
//! proposal for the same board. Different boards run on different workers.

use std::ops::ControlFlow;

use slate_core::{Board, BoardId, Mutation};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::broadcast::{BroadcastStats, SubscriberSet};
use crate::error::CollabError;
use crate::peer::PeerEvent;
use crate::protocol::Message;
use crate::transport::{SessionHandle, TransportError};

/// Result of proposing a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Committed; the board is now at `version`
    Accepted { version: u64 },
    /// Stale: the owner's board had already moved on
    Rejected { current_version: u64 },
    /// Sent to the remote owner; the answer, if any, arrives as a broadcast
    Forwarded,
}

impl ProposalOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, ProposalOutcome::Accepted { .. })
    }
}

/// Commands understood by a [`BoardWorker`].
#[derive(Debug)]
pub enum BoardCommand {
    Read {
        reply: oneshot::Sender<Board>,
    },
    /// Answer a GET_BOARD_DATA with BOARD_DATA on `session`
    ServeSnapshot {
        session: SessionHandle,
    },
    Subscribe {
        session: SessionHandle,
    },
    Unsubscribe {
        session_id: Uuid,
    },
    Propose {
        expected_version: u64,
        mutation: Mutation,
        reply: Option<oneshot::Sender<ProposalOutcome>>,
    },
    /// Toggle sharing; unsharing sends BOARD_DELETED to every subscriber
    SetShared {
        shared: bool,
        reply: oneshot::Sender<usize>,
    },
    /// Notify subscribers and stop the worker
    Delete {
        reply: oneshot::Sender<Board>,
    },
    Stats {
        reply: oneshot::Sender<BroadcastStats>,
    },
}

/// Actor holding an owned board and its subscribers.
pub struct BoardWorker {
    board: Board,
    subscribers: SubscriberSet,
    commands: mpsc::Receiver<BoardCommand>,
    events: Option<mpsc::Sender<PeerEvent>>,
}

impl BoardWorker {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if self.handle(command).is_break() {
                break;
            }
        }
        log::debug!("Worker for board {} stopped", self.board.id());
    }

    fn handle(&mut self, command: BoardCommand) -> ControlFlow<()> {
        match command {
            BoardCommand::Read { reply } => {
                let _ = reply.send(self.board.clone());
            }

            BoardCommand::ServeSnapshot { session } => {
                let msg = Message::BoardData(self.board.snapshot());
                match session.try_emit(&msg) {
                    Ok(()) => {}
                    Err(TransportError::Backpressure(_)) => {
                        // A snapshot must not be lost; wait for room off the worker.
                        tokio::spawn(async move {
                            let _ = session.emit(&msg).await;
                        });
                    }
                    Err(e) => log::debug!("Snapshot of {} not delivered: {e}", self.board.id()),
                }
            }

            BoardCommand::Subscribe { session } => {
                log::info!("{} subscribed to board {}", session.remote(), self.board.id());
                self.subscribers.add(session);
            }

            BoardCommand::Unsubscribe { session_id } => {
                if let Some(session) = self.subscribers.remove(&session_id) {
                    log::info!("{} unsubscribed from board {}", session.remote(), self.board.id());
                }
            }

            BoardCommand::Propose {
                expected_version,
                mutation,
                reply,
            } => {
                let outcome = self.propose(expected_version, mutation);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }

            BoardCommand::SetShared { shared, reply } => {
                self.board.set_shared(shared);
                let notified = if shared { 0 } else { self.withdraw() };
                let _ = reply.send(notified);
            }

            BoardCommand::Delete { reply } => {
                self.withdraw();
                let _ = reply.send(self.board.clone());
                return ControlFlow::Break(());
            }

            BoardCommand::Stats { reply } => {
                let _ = reply.send(self.subscribers.stats());
            }
        }
        ControlFlow::Continue(())
    }

    fn propose(&mut self, expected_version: u64, mutation: Mutation) -> ProposalOutcome {
        let kind = mutation.kind();
        if !self.board.apply(&mutation, expected_version) {
            return ProposalOutcome::Rejected {
                current_version: self.board.version(),
            };
        }

        let version = self.board.version();
        let accepted = Message::Accepted {
            kind,
            snapshot: self.board.snapshot(),
        };
        let delivered = self.subscribers.broadcast(&accepted);
        log::debug!(
            "Board {} accepted {kind:?} at version {version}, sent to {delivered} subscribers",
            self.board.id()
        );

        if let Some(events) = &self.events {
            let _ = events.try_send(PeerEvent::BoardUpdated {
                id: self.board.id().clone(),
                version,
            });
        }
        ProposalOutcome::Accepted { version }
    }

    /// Tell every subscriber the board is gone and forget them.
    fn withdraw(&mut self) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        let count = self.subscribers.broadcast(&Message::Deleted(self.board.id().clone()));
        self.subscribers.drain();
        count
    }
}

/// Handle to a running [`BoardWorker`].
#[derive(Debug, Clone)]
pub struct BoardHandle {
    id: BoardId,
    commands: mpsc::Sender<BoardCommand>,
}

impl BoardHandle {
    /// Spawn a worker for `board` with a command queue of `capacity`.
    pub fn spawn(board: Board, capacity: usize, events: Option<mpsc::Sender<PeerEvent>>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = board.id().clone();
        let worker = BoardWorker {
            board,
            subscribers: SubscriberSet::new(),
            commands: rx,
            events,
        };
        tokio::spawn(worker.run());
        Self { id, commands: tx }
    }

    pub fn id(&self) -> &BoardId {
        &self.id
    }

    async fn send(&self, command: BoardCommand) -> Result<(), CollabError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CollabError::WorkerGone(self.id.clone()))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> BoardCommand) -> Result<T, CollabError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| CollabError::WorkerGone(self.id.clone()))
    }

    /// Copy of the canonical board.
    pub async fn read(&self) -> Result<Board, CollabError> {
        self.request(|reply| BoardCommand::Read { reply }).await
    }

    /// Propose a mutation and wait for the CAS outcome.
    pub async fn propose(&self, expected_version: u64, mutation: Mutation) -> Result<ProposalOutcome, CollabError> {
        self.request(|reply| BoardCommand::Propose {
            expected_version,
            mutation,
            reply: Some(reply),
        })
        .await
    }

    /// Queue a proposal without waiting for its outcome.
    pub async fn submit(&self, expected_version: u64, mutation: Mutation) -> Result<(), CollabError> {
        self.send(BoardCommand::Propose {
            expected_version,
            mutation,
            reply: None,
        })
        .await
    }

    pub async fn serve_snapshot(&self, session: SessionHandle) -> Result<(), CollabError> {
        self.send(BoardCommand::ServeSnapshot { session }).await
    }

    pub async fn subscribe(&self, session: SessionHandle) -> Result<(), CollabError> {
        self.send(BoardCommand::Subscribe { session }).await
    }

    pub async fn unsubscribe(&self, session_id: Uuid) -> Result<(), CollabError> {
        self.send(BoardCommand::Unsubscribe { session_id }).await
    }

    /// Returns how many subscribers were told the board was withdrawn.
    pub async fn set_shared(&self, shared: bool) -> Result<usize, CollabError> {
        self.request(|reply| BoardCommand::SetShared { shared, reply }).await
    }

    /// Stop the worker, returning the final board.
    pub async fn delete(&self) -> Result<Board, CollabError> {
        self.request(|reply| BoardCommand::Delete { reply }).await
    }

    pub async fn stats(&self) -> Result<BroadcastStats, CollabError> {
        self.request(|reply| BoardCommand::Stats { reply }).await
    }
}
