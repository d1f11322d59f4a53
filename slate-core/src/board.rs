//! Board replica with version-gated (compare-and-swap) mutations.
//!
//! Canonical serialization:
//! ```text
//! host:port:boardid % version % path % path % ...
//! └──── BoardId ───┘   └ u64 ┘   └── EncodedPath list (may be empty) ──┘
//! ```
//!
//! Only the owning peer calls the CAS operations ([`Board::add_path`],
//! [`Board::undo`], [`Board::clear`]). Viewers overwrite their replica with
//! [`Board::apply_from_string`] whenever the owner publishes a new state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::error::BoardError;
use crate::id::BoardId;
use crate::path::{EncodedPath, PATH_SEPARATOR};

/// Kind of a board mutation; selects the UPDATE/ACCEPTED event pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Path,
    Undo,
    Clear,
}

/// A proposed change to a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    AddPath(EncodedPath),
    Undo,
    Clear,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::AddPath(_) => MutationKind::Path,
            Mutation::Undo => MutationKind::Undo,
            Mutation::Clear => MutationKind::Clear,
        }
    }
}

/// Parsed form of the canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub id: BoardId,
    pub version: u64,
    pub paths: Vec<EncodedPath>,
}

impl BoardSnapshot {
    pub fn parse(s: &str) -> Result<Self, BoardError> {
        let (id, rest) = s
            .split_once(PATH_SEPARATOR)
            .ok_or_else(|| BoardError::MalformedPayload(format!("missing version in `{s}`")))?;
        let (version, payload) = rest
            .split_once(PATH_SEPARATOR)
            .ok_or_else(|| BoardError::MalformedPayload(format!("missing path section in `{s}`")))?;

        let id = BoardId::parse(id)?;
        let version = version
            .parse::<u64>()
            .map_err(|_| BoardError::InvalidVersion(version.to_string()))?;
        let paths = if payload.is_empty() {
            Vec::new()
        } else {
            payload
                .split(PATH_SEPARATOR)
                .map(EncodedPath::new)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self { id, version, paths })
    }
}

impl fmt::Display for BoardSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{PATH_SEPARATOR}{}{PATH_SEPARATOR}", self.id, self.version)?;
        for (i, path) in self.paths.iter().enumerate() {
            if i > 0 {
                write!(f, "{PATH_SEPARATOR}")?;
            }
            f.write_str(path.as_str())?;
        }
        Ok(())
    }
}

/// A mutation addressed to a board at the version its sender last observed.
///
/// Wire payload: `id%expectedVersion%path` for new paths, `id%expectedVersion%`
/// for undo and clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: BoardId,
    pub expected_version: u64,
    pub mutation: Mutation,
}

impl Proposal {
    pub fn parse(kind: MutationKind, payload: &str) -> Result<Self, BoardError> {
        let BoardSnapshot { id, version, mut paths } = BoardSnapshot::parse(payload)?;
        let mutation = match kind {
            MutationKind::Path => {
                if paths.len() != 1 {
                    return Err(BoardError::MalformedPayload(format!(
                        "path proposal must carry exactly one path, got {}",
                        paths.len()
                    )));
                }
                Mutation::AddPath(paths.remove(0))
            }
            MutationKind::Undo => Mutation::Undo,
            MutationKind::Clear => Mutation::Clear,
        };
        Ok(Self { id, expected_version: version, mutation })
    }
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{PATH_SEPARATOR}{}{PATH_SEPARATOR}", self.id, self.expected_version)?;
        if let Mutation::AddPath(path) = &self.mutation {
            f.write_str(path.as_str())?;
        }
        Ok(())
    }
}

/// One replica of a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    id: BoardId,
    version: u64,
    paths: Vec<EncodedPath>,
    shared: bool,
    owned: bool,
}

impl Board {
    /// A board created by this process: version 0, no paths, not shared.
    pub fn new_owned(id: BoardId) -> Self {
        Self {
            id,
            version: 0,
            paths: Vec::new(),
            shared: false,
            owned: true,
        }
    }

    /// An empty view of a board owned elsewhere. Remote boards are only ever
    /// known because they are shared.
    pub fn new_view(id: BoardId) -> Self {
        Self {
            id,
            version: 0,
            paths: Vec::new(),
            shared: true,
            owned: false,
        }
    }

    pub fn id(&self) -> &BoardId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn paths(&self) -> &[EncodedPath] {
        &self.paths
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Append `path` if `expected_version` is the current version.
    pub fn add_path(&mut self, path: EncodedPath, expected_version: u64) -> bool {
        if !self.gate(expected_version) {
            return false;
        }
        self.paths.push(path);
        self.version += 1;
        true
    }

    /// Remove the last path if `expected_version` is the current version.
    /// Undo on an empty board never succeeds.
    pub fn undo(&mut self, expected_version: u64) -> bool {
        if self.paths.is_empty() {
            log::debug!("undo on empty board {} ignored", self.id);
            return false;
        }
        if !self.gate(expected_version) {
            return false;
        }
        self.paths.pop();
        self.version += 1;
        true
    }

    /// Remove every path if `expected_version` is the current version.
    pub fn clear(&mut self, expected_version: u64) -> bool {
        if !self.gate(expected_version) {
            return false;
        }
        self.paths.clear();
        self.version += 1;
        true
    }

    pub fn apply(&mut self, mutation: &Mutation, expected_version: u64) -> bool {
        match mutation {
            Mutation::AddPath(path) => self.add_path(path.clone(), expected_version),
            Mutation::Undo => self.undo(expected_version),
            Mutation::Clear => self.clear(expected_version),
        }
    }

    fn gate(&self, expected_version: u64) -> bool {
        if expected_version == self.version {
            return true;
        }
        log::debug!(
            "stale mutation on {}: expected version {expected_version}, board is at {}",
            self.id,
            self.version
        );
        false
    }

    /// A proposal for `mutation` against the version this replica holds.
    pub fn proposal(&self, mutation: Mutation) -> Proposal {
        Proposal {
            id: self.id.clone(),
            expected_version: self.version,
            mutation,
        }
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            id: self.id.clone(),
            version: self.version,
            paths: self.paths.clone(),
        }
    }

    /// `id%version%paths`.
    pub fn serialize(&self) -> String {
        self.snapshot().to_string()
    }

    /// Overwrite version and paths from a received serialization of this board.
    pub fn apply_from_string(&mut self, encoded: &str) -> Result<(), BoardError> {
        let snapshot = BoardSnapshot::parse(encoded)?;
        self.apply_snapshot(snapshot)
    }

    /// Overwrite version and paths from an already parsed snapshot.
    pub fn apply_snapshot(&mut self, snapshot: BoardSnapshot) -> Result<(), BoardError> {
        if snapshot.id != self.id {
            return Err(BoardError::IdMismatch {
                expected: self.id.to_string(),
                found: snapshot.id.to_string(),
            });
        }
        self.version = snapshot.version;
        self.paths = snapshot.paths;
        Ok(())
    }

    pub fn draw(&self, canvas: &mut impl Canvas) {
        canvas.clear();
        canvas.draw(&self.paths);
    }
}
