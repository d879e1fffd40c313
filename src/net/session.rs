//! Player/session registry owned by the networking layer

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use crate::game::types::PlayerId;

/// Frames a connection's writer may fall behind by before it is cut off
pub const RELIABLE_QUEUE_LEN: usize = 256;

/// Connection handle for routing frames to one player
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    /// Remote address of the reliable stream
    pub peer: SocketAddr,
    /// Secret the client echoes in UDP datagrams to bind its address
    pub udp_token: u64,
    /// Bound after the first authenticated datagram
    pub udp_addr: Option<SocketAddr>,
    /// Frames queued for the connection's writer task
    pub reliable_tx: mpsc::Sender<Bytes>,
    /// Signalled when the connection must be closed from the server side
    pub kick: Arc<Notify>,
}

/// Registry of live connections, keyed by player id
pub struct SessionRegistry {
    sessions: DashMap<PlayerId, Session>,
    next_id: AtomicU32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register a new connection.
    /// Returns the assigned player id and the receiving end of its reliable channel.
    pub fn register(&self, peer: SocketAddr) -> (PlayerId, u64, mpsc::Receiver<Bytes>) {
        let player_id = PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let udp_token = rand::random();
        let (reliable_tx, reliable_rx) = mpsc::channel(RELIABLE_QUEUE_LEN);

        self.sessions.insert(
            player_id,
            Session {
                player_id,
                peer,
                udp_token,
                udp_addr: None,
                reliable_tx,
                kick: Arc::new(Notify::new()),
            },
        );

        info!(player_id = %player_id, peer = %peer, "Session registered");
        (player_id, udp_token, reliable_rx)
    }

    /// Drop a connection; later sends to this id fail with `UnknownPlayer`
    pub fn unregister(&self, player_id: PlayerId) -> Option<Session> {
        let removed = self.sessions.remove(&player_id).map(|(_, s)| s);
        if removed.is_some() {
            info!(player_id = %player_id, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, player_id: PlayerId) -> Option<Session> {
        self.sessions.get(&player_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.sessions.contains_key(&player_id)
    }

    /// Bind the datagram source address for a session if the token matches
    pub fn bind_udp(&self, player_id: PlayerId, udp_token: u64, addr: SocketAddr) -> bool {
        match self.sessions.get_mut(&player_id) {
            Some(mut session) if session.udp_token == udp_token => {
                if session.udp_addr != Some(addr) {
                    debug!(player_id = %player_id, addr = %addr, "UDP address bound");
                    session.udp_addr = Some(addr);
                }
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn ids_are_unique_and_unregister_removes() {
        let registry = SessionRegistry::new();
        let (a, _, _rx_a) = registry.register(peer());
        let (b, _, _rx_b) = registry.register(peer());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(a).is_some());
        assert!(registry.get(a).is_none());
        assert!(registry.unregister(a).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn udp_bind_requires_matching_token() {
        let registry = SessionRegistry::new();
        let (id, token, _rx) = registry.register(peer());
        let udp: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        assert!(!registry.bind_udp(id, token.wrapping_add(1), udp));
        assert_eq!(registry.get(id).unwrap().udp_addr, None);

        assert!(registry.bind_udp(id, token, udp));
        assert_eq!(registry.get(id).unwrap().udp_addr, Some(udp));
        assert!(!registry.bind_udp(PlayerId(999), token, udp));
    }
}
