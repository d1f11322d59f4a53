use slate_core::{BoardError, BoardId};
use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Errors surfaced to callers of the peer and directory APIs.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("unknown board {0}")]
    UnknownBoard(BoardId),
    #[error("board {0} is owned by another peer")]
    NotOwner(BoardId),
    #[error("board {0} is already open")]
    AlreadyOpen(BoardId),
    #[error("worker for board {0} has stopped")]
    WorkerGone(BoardId),
    #[error("no session to the owner of {0}")]
    OwnerUnreachable(BoardId),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
