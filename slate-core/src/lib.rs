//! # slate-core: board replicas for Slate
//!
//! A board is an ordered list of drawn paths plus a version counter. The
//! owning peer mutates it through compare-and-swap operations gated on the
//! version a proposer last observed; every other peer holds a view that is
//! overwritten from the owner's canonical serialization.
//!
//! ## Modules
//!
//! - [`id`]: `host:port:boardid` identifiers
//! - [`path`]: opaque path segments and typed strokes
//! - [`board`]: the replica, mutations, proposals and wire snapshots
//! - [`canvas`]: rendering seam

pub mod board;
pub mod canvas;
pub mod error;
pub mod id;
pub mod path;

pub use board::{Board, BoardSnapshot, Mutation, MutationKind, Proposal};
pub use canvas::Canvas;
pub use error::BoardError;
pub use id::BoardId;
pub use path::{EncodedPath, Path, PathColor, Point};
