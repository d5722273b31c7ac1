//! Relay directory and relay-link probe
//!
//! The relay set is parsed once at startup from the configured relay
//! multiaddrs. Whether a relay link is open is decided from a connection
//! snapshot alone; no network I/O happens here.

use super::abstraction::{ConnectionInfo, ProbeResult};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Known relay servers, keyed by the peer id embedded in their multiaddr.
#[derive(Debug, Clone, Default)]
pub struct RelayDirectory {
    relay_peers: HashSet<PeerId>,
}

impl RelayDirectory {
    /// Build the directory from configured relay multiaddrs.
    ///
    /// Entries that fail to parse or carry no `/p2p/` component are skipped
    /// with a warning. An empty directory degrades to "no relay reachable"
    /// rather than failing construction.
    pub fn new<I, S>(multiaddrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut relay_peers = HashSet::new();
        for raw in multiaddrs {
            let raw = raw.as_ref();
            match raw.parse::<Multiaddr>() {
                Ok(addr) => match Self::extract_peer_id(&addr) {
                    Some(peer) => {
                        debug!("Relay server registered: {peer}");
                        relay_peers.insert(peer);
                    }
                    None => warn!("Relay multiaddr has no /p2p/ component: {raw}"),
                },
                Err(err) => warn!("Skipping unparseable relay multiaddr {raw}: {err}"),
            }
        }
        if relay_peers.is_empty() {
            warn!("Relay directory is empty; relay connectivity will read as down");
        }
        Self { relay_peers }
    }

    /// Peer id embedded in a multiaddr, if any.
    pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
        addr.iter().find_map(|proto| match proto {
            Protocol::P2p(peer) => Some(peer),
            _ => None,
        })
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.relay_peers.contains(peer)
    }

    pub fn is_empty(&self) -> bool {
        self.relay_peers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.relay_peers.len()
    }
}

/// Pure inspection: is at least one relay link open right now?
#[derive(Debug, Clone)]
pub struct RelayConnectivityProbe {
    directory: RelayDirectory,
}

impl RelayConnectivityProbe {
    pub fn new(directory: RelayDirectory) -> Self {
        Self { directory }
    }

    /// First open connection to a known relay, if any.
    pub fn open_relay_peer(&self, connections: &[ConnectionInfo]) -> Option<PeerId> {
        connections
            .iter()
            .find(|conn| conn.is_open() && self.directory.contains(&conn.remote_peer_id))
            .map(|conn| conn.remote_peer_id)
    }

    /// Link-presence verdict. Latency is measured separately by the monitor:
    /// the link being open is authoritative, a failed latency ping is noise.
    pub fn probe(&self, connections: &[ConnectionInfo]) -> ProbeResult {
        match self.open_relay_peer(connections) {
            Some(_) => ProbeResult::success(None),
            None => ProbeResult::failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::ConnectionState;
    use std::str::FromStr;

    const RELAY_PEER: &str = "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN";
    const OTHER_PEER: &str = "QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa";

    fn relay_peer() -> PeerId {
        PeerId::from_str(RELAY_PEER).unwrap()
    }

    fn other_peer() -> PeerId {
        PeerId::from_str(OTHER_PEER).unwrap()
    }

    fn relay_addr() -> String {
        format!("/ip4/147.28.186.157/tcp/4001/p2p/{RELAY_PEER}")
    }

    #[test]
    fn test_directory_from_multiaddrs() {
        let directory = RelayDirectory::new([relay_addr()]);
        assert_eq!(directory.len(), 1);
        assert!(directory.contains(&relay_peer()));
        assert!(!directory.contains(&other_peer()));
    }

    #[test]
    fn test_unparseable_entries_are_skipped() {
        let directory = RelayDirectory::new([
            "not a multiaddr".to_string(),
            "/ip4/10.0.0.1/tcp/4001".to_string(), // no /p2p/ component
            relay_addr(),
        ]);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_empty_directory_degrades() {
        let directory = RelayDirectory::new(Vec::<String>::new());
        assert!(directory.is_empty());

        let probe = RelayConnectivityProbe::new(directory);
        let connections = vec![ConnectionInfo::open(relay_peer())];
        assert_eq!(probe.probe(&connections), ProbeResult::failure());
    }

    #[test]
    fn test_extract_peer_id() {
        let addr: Multiaddr = relay_addr().parse().unwrap();
        assert_eq!(RelayDirectory::extract_peer_id(&addr), Some(relay_peer()));

        let bare: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(RelayDirectory::extract_peer_id(&bare), None);
    }

    #[test]
    fn test_probe_open_relay_link() {
        let probe = RelayConnectivityProbe::new(RelayDirectory::new([relay_addr()]));

        let connections = vec![
            ConnectionInfo::open(other_peer()),
            ConnectionInfo::open(relay_peer()),
        ];
        assert_eq!(probe.probe(&connections), ProbeResult::success(None));
        assert_eq!(probe.open_relay_peer(&connections), Some(relay_peer()));
    }

    #[test]
    fn test_probe_closed_relay_link_reads_down() {
        let probe = RelayConnectivityProbe::new(RelayDirectory::new([relay_addr()]));

        let connections = vec![ConnectionInfo {
            remote_peer_id: relay_peer(),
            state: ConnectionState::Closed,
        }];
        assert_eq!(probe.probe(&connections), ProbeResult::failure());
    }

    #[test]
    fn test_probe_non_relay_connections_read_down() {
        let probe = RelayConnectivityProbe::new(RelayDirectory::new([relay_addr()]));

        let connections = vec![ConnectionInfo::open(other_peer())];
        assert_eq!(probe.probe(&connections), ProbeResult::failure());
        assert_eq!(probe.open_relay_peer(&connections), None);
    }

    #[test]
    fn test_probe_no_connections() {
        let probe = RelayConnectivityProbe::new(RelayDirectory::new([relay_addr()]));
        assert_eq!(probe.probe(&[]), ProbeResult::failure());
    }
}
