//! Named-event wire protocol between peers and the directory.
//!
//! Wire format (bincode-encoded [`Frame`], one per WebSocket binary message):
//! ```text
//! ┌───────────┬──────────────────────────────────────────────┐
//! │ event tag │ payload (UTF-8 text)                         │
//! │ varint    │ boardId  |  id%version%paths  |  error text  │
//! └───────────┴──────────────────────────────────────────────┘
//! ```
//!
//! [`Message`] is the typed view of a frame; payload parsing happens once, at
//! the edge, so dispatchers only ever see well-formed ids and snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};
use slate_core::{BoardError, BoardId, BoardSnapshot, MutationKind, Proposal};
use thiserror::Error;

/// Event names of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Event {
    /// Directory → peer: board newly available
    SharingBoard = 1,
    /// Directory → peer: board withdrawn
    UnsharingBoard = 2,
    /// Owner → directory: mark a board shared
    ShareBoard = 3,
    /// Owner → directory: withdraw a board
    UnshareBoard = 4,
    /// Viewer → owner: subscribe to accepted mutations
    BoardListen = 5,
    /// Viewer → owner: unsubscribe
    BoardUnlisten = 6,
    /// Viewer → owner: request a full snapshot
    GetBoardData = 7,
    /// Owner → viewer: full snapshot
    BoardData = 8,
    BoardPathUpdate = 9,
    BoardUndoUpdate = 10,
    BoardClearUpdate = 11,
    BoardPathAccepted = 12,
    BoardUndoAccepted = 13,
    BoardClearAccepted = 14,
    /// Owner → subscribers: discard your replica
    BoardDeleted = 15,
    /// Any direction: protocol-level error text
    BoardError = 16,
}

impl Event {
    pub const ALL: [Event; 16] = [
        Event::SharingBoard,
        Event::UnsharingBoard,
        Event::ShareBoard,
        Event::UnshareBoard,
        Event::BoardListen,
        Event::BoardUnlisten,
        Event::GetBoardData,
        Event::BoardData,
        Event::BoardPathUpdate,
        Event::BoardUndoUpdate,
        Event::BoardClearUpdate,
        Event::BoardPathAccepted,
        Event::BoardUndoAccepted,
        Event::BoardClearAccepted,
        Event::BoardDeleted,
        Event::BoardError,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Event::SharingBoard => "SHARING_BOARD",
            Event::UnsharingBoard => "UNSHARING_BOARD",
            Event::ShareBoard => "SHARE_BOARD",
            Event::UnshareBoard => "UNSHARE_BOARD",
            Event::BoardListen => "BOARD_LISTEN",
            Event::BoardUnlisten => "BOARD_UNLISTEN",
            Event::GetBoardData => "GET_BOARD_DATA",
            Event::BoardData => "BOARD_DATA",
            Event::BoardPathUpdate => "BOARD_PATH_UPDATE",
            Event::BoardUndoUpdate => "BOARD_UNDO_UPDATE",
            Event::BoardClearUpdate => "BOARD_CLEAR_UPDATE",
            Event::BoardPathAccepted => "BOARD_PATH_ACCEPTED",
            Event::BoardUndoAccepted => "BOARD_UNDO_ACCEPTED",
            Event::BoardClearAccepted => "BOARD_CLEAR_ACCEPTED",
            Event::BoardDeleted => "BOARD_DELETED",
            Event::BoardError => "BOARD_ERROR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Proposal event for a mutation kind.
    pub const fn update(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Path => Event::BoardPathUpdate,
            MutationKind::Undo => Event::BoardUndoUpdate,
            MutationKind::Clear => Event::BoardClearUpdate,
        }
    }

    /// Acceptance event for a mutation kind.
    pub const fn accepted(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Path => Event::BoardPathAccepted,
            MutationKind::Undo => Event::BoardUndoAccepted,
            MutationKind::Clear => Event::BoardClearAccepted,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named event as it travels over a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub event: Event,
    pub payload: String,
}

impl Frame {
    pub fn new(event: Event, payload: impl Into<String>) -> Self {
        Self {
            event,
            payload: payload.into(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }
}

/// Typed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SharingBoard(BoardId),
    UnsharingBoard(BoardId),
    ShareBoard(BoardId),
    UnshareBoard(BoardId),
    Listen(BoardId),
    Unlisten(BoardId),
    GetBoardData(BoardId),
    BoardData(BoardSnapshot),
    /// BOARD_*_UPDATE: a mutation proposed at the sender's observed version
    Update(Proposal),
    /// BOARD_*_ACCEPTED: the owner's state right after a committed mutation
    Accepted {
        kind: MutationKind,
        snapshot: BoardSnapshot,
    },
    Deleted(BoardId),
    Error(String),
}

impl Message {
    pub fn event(&self) -> Event {
        match self {
            Message::SharingBoard(_) => Event::SharingBoard,
            Message::UnsharingBoard(_) => Event::UnsharingBoard,
            Message::ShareBoard(_) => Event::ShareBoard,
            Message::UnshareBoard(_) => Event::UnshareBoard,
            Message::Listen(_) => Event::BoardListen,
            Message::Unlisten(_) => Event::BoardUnlisten,
            Message::GetBoardData(_) => Event::GetBoardData,
            Message::BoardData(_) => Event::BoardData,
            Message::Update(proposal) => Event::update(proposal.mutation.kind()),
            Message::Accepted { kind, .. } => Event::accepted(*kind),
            Message::Deleted(_) => Event::BoardDeleted,
            Message::Error(_) => Event::BoardError,
        }
    }

    /// Board this message is about, if any.
    pub fn board_id(&self) -> Option<&BoardId> {
        match self {
            Message::SharingBoard(id)
            | Message::UnsharingBoard(id)
            | Message::ShareBoard(id)
            | Message::UnshareBoard(id)
            | Message::Listen(id)
            | Message::Unlisten(id)
            | Message::GetBoardData(id)
            | Message::Deleted(id) => Some(id),
            Message::BoardData(snapshot) | Message::Accepted { snapshot, .. } => Some(&snapshot.id),
            Message::Update(proposal) => Some(&proposal.id),
            Message::Error(_) => None,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let payload = match self {
            Message::SharingBoard(id)
            | Message::UnsharingBoard(id)
            | Message::ShareBoard(id)
            | Message::UnshareBoard(id)
            | Message::Listen(id)
            | Message::Unlisten(id)
            | Message::GetBoardData(id)
            | Message::Deleted(id) => id.to_string(),
            Message::BoardData(snapshot) | Message::Accepted { snapshot, .. } => snapshot.to_string(),
            Message::Update(proposal) => proposal.to_string(),
            Message::Error(text) => text.clone(),
        };
        Frame::new(self.event(), payload)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let malformed = |source: BoardError| ProtocolError::Malformed {
            event: frame.event,
            source,
        };
        let id = || BoardId::parse(&frame.payload).map_err(malformed);
        let snapshot = || BoardSnapshot::parse(&frame.payload).map_err(malformed);
        let proposal = |kind| Proposal::parse(kind, &frame.payload).map_err(malformed);

        Ok(match frame.event {
            Event::SharingBoard => Message::SharingBoard(id()?),
            Event::UnsharingBoard => Message::UnsharingBoard(id()?),
            Event::ShareBoard => Message::ShareBoard(id()?),
            Event::UnshareBoard => Message::UnshareBoard(id()?),
            Event::BoardListen => Message::Listen(id()?),
            Event::BoardUnlisten => Message::Unlisten(id()?),
            Event::GetBoardData => Message::GetBoardData(id()?),
            Event::BoardData => Message::BoardData(snapshot()?),
            Event::BoardPathUpdate => Message::Update(proposal(MutationKind::Path)?),
            Event::BoardUndoUpdate => Message::Update(proposal(MutationKind::Undo)?),
            Event::BoardClearUpdate => Message::Update(proposal(MutationKind::Clear)?),
            Event::BoardPathAccepted => Message::Accepted {
                kind: MutationKind::Path,
                snapshot: snapshot()?,
            },
            Event::BoardUndoAccepted => Message::Accepted {
                kind: MutationKind::Undo,
                snapshot: snapshot()?,
            },
            Event::BoardClearAccepted => Message::Accepted {
                kind: MutationKind::Clear,
                snapshot: snapshot()?,
            },
            Event::BoardDeleted => Message::Deleted(id()?),
            Event::BoardError => Message::Error(frame.payload.clone()),
        })
    }

    /// Encode straight to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_frame().encode()
    }

    /// Decode wire bytes into a typed message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_frame(&Frame::decode(bytes)?)
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: Event,
        #[source]
        source: BoardError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_core::{EncodedPath, Mutation};

    fn id() -> BoardId {
        BoardId::parse("10.0.0.1:9000:board1").unwrap()
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in Event::ALL {
            assert_eq!(Event::from_name(event.name()), Some(event));
        }
        assert_eq!(Event::from_name("BOARD_NOPE"), None);
        assert_eq!(Event::BoardPathUpdate.to_string(), "BOARD_PATH_UPDATE");
    }

    #[test]
    fn test_event_values() {
        assert_eq!(Event::SharingBoard as u8, 1);
        assert_eq!(Event::BoardData as u8, 8);
        assert_eq!(Event::BoardError as u8, 16);
    }

    #[test]
    fn test_update_and_accepted_pairs() {
        assert_eq!(Event::update(MutationKind::Undo), Event::BoardUndoUpdate);
        assert_eq!(Event::accepted(MutationKind::Clear), Event::BoardClearAccepted);
        assert_eq!(Event::accepted(MutationKind::Path), Event::BoardPathAccepted);
    }

    #[test]
    fn test_frame_payloads_follow_grammar() {
        let path = EncodedPath::new("A").unwrap();
        let proposal = Proposal {
            id: id(),
            expected_version: 0,
            mutation: Mutation::AddPath(path.clone()),
        };
        let frame = Message::Update(proposal).to_frame();
        assert_eq!(frame.event, Event::BoardPathUpdate);
        assert_eq!(frame.payload, "10.0.0.1:9000:board1%0%A");

        let undo = Proposal {
            id: id(),
            expected_version: 3,
            mutation: Mutation::Undo,
        };
        assert_eq!(Message::Update(undo).to_frame().payload, "10.0.0.1:9000:board1%3%");

        let accepted = Message::Accepted {
            kind: MutationKind::Path,
            snapshot: BoardSnapshot {
                id: id(),
                version: 1,
                paths: vec![path],
            },
        };
        let frame = accepted.to_frame();
        assert_eq!(frame.event, Event::BoardPathAccepted);
        assert_eq!(frame.payload, "10.0.0.1:9000:board1%1%A");

        assert_eq!(Message::Listen(id()).to_frame().payload, "10.0.0.1:9000:board1");
    }

    #[test]
    fn test_wire_round_trip_preserves_message() {
        let msg = Message::Accepted {
            kind: MutationKind::Undo,
            snapshot: BoardSnapshot::parse("10.0.0.1:9000:board1%4%red;1,2").unwrap(),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let frame = Frame::new(Event::BoardData, "10.0.0.1:9000:board1%notaversion%");
        match Message::from_frame(&frame) {
            Err(ProtocolError::Malformed { event, .. }) => assert_eq!(event, Event::BoardData),
            other => panic!("expected malformed error, got {other:?}"),
        }

        let frame = Frame::new(Event::BoardListen, "no-colons");
        assert!(Message::from_frame(&frame).is_err());

        let frame = Frame::new(Event::BoardPathUpdate, "10.0.0.1:9000:board1%0%");
        assert!(Message::from_frame(&frame).is_err());
    }

    #[test]
    fn test_error_payload_is_free_text() {
        let frame = Frame::new(Event::BoardError, "anything: goes % here");
        assert_eq!(
            Message::from_frame(&frame).unwrap(),
            Message::Error("anything: goes % here".into())
        );
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(matches!(Frame::decode(&garbage), Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_board_id_accessor() {
        assert_eq!(Message::Deleted(id()).board_id(), Some(&id()));
        assert_eq!(Message::Error("x".into()).board_id(), None);
    }
}
