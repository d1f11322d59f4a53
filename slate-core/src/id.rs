//! Globally unique board identifiers of the form `host:port:boardid`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// Last timestamp handed out by [`BoardId::generate`]; keeps generated names
/// unique when two boards are created within the same millisecond.
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Identifier of a board: the owning peer's `host:port` plus a local name.
///
/// The local name never contains `:`, so the textual form can always be split
/// from the right. The host may (IPv6 literals), the port never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardId {
    host: String,
    port: u16,
    name: String,
}

impl BoardId {
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<String>) -> Result<Self, BoardError> {
        let host = host.into();
        let name = name.into();
        if host.is_empty() || host.contains('%') {
            return Err(BoardError::InvalidId(format!("{host}:{port}:{name}")));
        }
        if name.is_empty() || name.contains(':') || name.contains('%') {
            return Err(BoardError::InvalidName(name));
        }
        Ok(Self { host, port, name })
    }

    /// Create a fresh id for a board owned by `host:port`, named after the
    /// creation time in milliseconds since the epoch.
    pub fn generate(host: impl Into<String>, port: u16) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = LAST_STAMP.load(Ordering::Relaxed);
        let stamp = loop {
            let candidate = now.max(last + 1);
            match LAST_STAMP.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break candidate,
                Err(seen) => last = seen,
            }
        };
        Self {
            host: host.into(),
            port,
            name: format!("board{stamp}"),
        }
    }

    /// Parse `host:port:boardid`.
    pub fn parse(s: &str) -> Result<Self, BoardError> {
        let mut parts = s.rsplitn(3, ':');
        let (name, port, host) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(port), Some(host)) => (name, port, host),
            _ => return Err(BoardError::InvalidId(s.to_string())),
        };
        let port = port
            .parse::<u16>()
            .map_err(|_| BoardError::InvalidPort(s.to_string()))?;
        Self::new(host, port, name)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The local part of the id (`boardid`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `host:port` of the owning peer.
    pub fn owner_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the peer listening on `host:port` owns this board.
    pub fn is_owned_by(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.name)
    }
}

impl FromStr for BoardId {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id = BoardId::parse("10.0.0.1:9000:board1").unwrap();
        assert_eq!(id.host(), "10.0.0.1");
        assert_eq!(id.port(), 9000);
        assert_eq!(id.name(), "board1");
        assert_eq!(id.to_string(), "10.0.0.1:9000:board1");
        assert_eq!(id.owner_addr(), "10.0.0.1:9000");
    }

    #[test]
    fn test_parse_ipv6_host() {
        let id: BoardId = "::1:9000:board7".parse().unwrap();
        assert_eq!(id.host(), "::1");
        assert_eq!(id.port(), 9000);
        assert_eq!(id.name(), "board7");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(BoardId::parse("board1"), Err(BoardError::InvalidId(_))));
        assert!(matches!(BoardId::parse("host:board1"), Err(BoardError::InvalidId(_))));
        assert!(matches!(BoardId::parse("host:port:board1"), Err(BoardError::InvalidPort(_))));
        assert!(matches!(BoardId::parse("host:70000:board1"), Err(BoardError::InvalidPort(_))));
        assert!(matches!(BoardId::parse("host:9000:"), Err(BoardError::InvalidName(_))));
        assert!(BoardId::parse(":9000:board1").is_err());
    }

    #[test]
    fn test_new_rejects_separators_in_name() {
        assert!(BoardId::new("h", 1, "a:b").is_err());
        assert!(BoardId::new("h", 1, "a%b").is_err());
        assert!(BoardId::new("h", 1, "ok").is_ok());
    }

    #[test]
    fn test_generate_is_unique_and_parseable() {
        let a = BoardId::generate("127.0.0.1", 4000);
        let b = BoardId::generate("127.0.0.1", 4000);
        assert_ne!(a, b);
        assert!(a.name().starts_with("board"));
        assert_eq!(BoardId::parse(&a.to_string()).unwrap(), a);
        assert!(a.is_owned_by("127.0.0.1", 4000));
        assert!(!a.is_owned_by("127.0.0.1", 4001));
    }
}
