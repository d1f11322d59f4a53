//! # slate-collab: Board replication between whiteboard peers
//!
//! Every board has exactly one owning peer. Viewers fetch a snapshot,
//! subscribe, and propose mutations at the version they last saw; the owner
//! applies them compare-and-swap and broadcasts the resulting state. A
//! directory server announces which boards are shared.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │ DirectoryServer  │
//!                 │ (shared listing) │
//!                 └───▲──────────┬───┘
//!        SHARE_BOARD  │          │  SHARING_BOARD
//!                     │          ▼
//! ┌───────────────────┴──┐   WebSocket   ┌──────────────────────┐
//! │ WhiteboardPeer       │ ◄───────────► │ WhiteboardPeer       │
//! │ (owner)              │  named events │ (viewer)             │
//! └──────┬───────────────┘               └──────┬───────────────┘
//!        ▼                                      ▼
//! ┌──────────────┐                       ┌──────────────┐
//! │ BoardWorker  │ ── *_ACCEPTED ──────► │ view replica │
//! │ Board (CAS)  │                       │ (overwrite)  │
//! │ Subscribers  │                       └──────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Event names, bincode frames and typed messages
//! - [`transport`]: WebSocket sessions feeding one dispatcher queue
//! - [`broadcast`]: Subscriber fan-out that evicts lagging sessions
//! - [`worker`]: Per-board actor serializing proposals
//! - [`registry`]: Owned boards, views, directory listing, owner links
//! - [`peer`]: Application API
//! - [`directory`]: Shared-board directory and its server

pub mod broadcast;
pub mod config;
pub mod directory;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod registry;
mod session;
pub mod transport;
pub mod worker;

pub use broadcast::{BroadcastStats, SubscriberSet};
pub use config::{DirectoryConfig, PeerConfig};
pub use directory::{Directory, DirectoryServer, DirectoryStats};
pub use error::CollabError;
pub use peer::{PeerEvent, WhiteboardPeer};
pub use protocol::{Event, Frame, Message, ProtocolError};
pub use transport::{Inbound, SessionEvent, SessionHandle, TransportError};
pub use worker::{BoardHandle, ProposalOutcome};
