use thiserror::Error;

/// Errors raised while parsing or overwriting board state.
///
/// None of these ever leave a [`Board`](crate::Board) half-updated: every
/// parse happens before the first field is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("invalid board id `{0}`: expected host:port:boardid")]
    InvalidId(String),
    #[error("invalid port in board id `{0}`")]
    InvalidPort(String),
    #[error("board name `{0}` must be non-empty and contain no ':' or '%'")]
    InvalidName(String),
    #[error("invalid version `{0}`")]
    InvalidVersion(String),
    #[error("malformed board payload: {0}")]
    MalformedPayload(String),
    #[error("invalid path segment `{0}`")]
    InvalidPath(String),
    #[error("payload for {found} cannot be applied to board {expected}")]
    IdMismatch { expected: String, found: String },
}
