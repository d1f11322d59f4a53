//! Configuration for peers and the directory server.

/// Peer configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Host other peers use to reach us; becomes the host part of our board ids
    pub host: String,
    /// Listen port; 0 picks a free one
    pub port: u16,
    /// Directory address as `host:port` (None = no directory)
    pub directory: Option<String>,
    /// Outgoing frame queue per session
    pub session_queue_capacity: usize,
    /// Command queue per owned board
    pub board_queue_capacity: usize,
    /// Inbound dispatcher queue shared by all sessions
    pub dispatch_capacity: usize,
    /// Application event channel
    pub event_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            directory: None,
            session_queue_capacity: 256,
            board_queue_capacity: 64,
            dispatch_capacity: 1024,
            event_capacity: 256,
        }
    }
}

/// Directory server configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outgoing frame queue per connected peer
    pub session_queue_capacity: usize,
    /// Inbound dispatcher queue
    pub dispatch_capacity: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            session_queue_capacity: 256,
            dispatch_capacity: 1024,
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_addr() {
        assert_eq!(split_addr("127.0.0.1:9000"), Some(("127.0.0.1".to_string(), 9000)));
        assert_eq!(split_addr("[::1]:80"), Some(("::1".to_string(), 80)));
        assert_eq!(split_addr("localhost"), None);
        assert_eq!(split_addr(":80"), None);
        assert_eq!(split_addr("host:http"), None);
    }
}
