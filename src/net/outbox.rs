//! Outbound send path used by the simulation thread
//!
//! Sends are fire-and-forget: frames are handed to writer tasks over bounded channels
//! with `try_send`, so nothing here blocks the tick. A full datagram queue drops the
//! frame; a full stream queue disconnects the player.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::game::types::PlayerId;

use super::protocol::{ProtocolError, ServerMsg};
use super::session::SessionRegistry;

/// Transport channel class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Ordered, guaranteed delivery
    Reliable,
    /// Best effort, low latency
    Unreliable,
}

/// Send failures
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Player {0} has no session")]
    UnknownPlayer(PlayerId),

    #[error("Connection for player {0} is closed")]
    ChannelClosed(PlayerId),

    #[error("Outbound queue for player {0} is full")]
    QueueFull(PlayerId),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] ProtocolError),
}

/// Something the simulation can push server messages into
pub trait Outbox: Send + Sync {
    fn send(&self, to: PlayerId, channel: Channel, msg: &ServerMsg) -> Result<(), SendError>;
}

/// Datagrams the UDP send task may fall behind by before frames are dropped
pub const UDP_QUEUE_LEN: usize = 1024;

/// Outbox backed by the live session registry
#[derive(Clone)]
pub struct NetOutbox {
    sessions: Arc<SessionRegistry>,
    udp_tx: mpsc::Sender<(SocketAddr, Bytes)>,
    dropped: Arc<AtomicU64>,
}

impl NetOutbox {
    pub fn new(sessions: Arc<SessionRegistry>, udp_tx: mpsc::Sender<(SocketAddr, Bytes)>) -> Self {
        Self {
            sessions,
            udp_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames discarded because a queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Outbox for NetOutbox {
    fn send(&self, to: PlayerId, channel: Channel, msg: &ServerMsg) -> Result<(), SendError> {
        let session = self.sessions.get(to).ok_or(SendError::UnknownPlayer(to))?;
        let frame = msg.encode()?;

        match (channel, session.udp_addr) {
            (Channel::Unreliable, Some(addr)) => match self.udp_tx.try_send((addr, frame)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Err(SendError::QueueFull(to))
                }
                Err(TrySendError::Closed(_)) => Err(SendError::ChannelClosed(to)),
            },
            // No datagram route yet: deliver over the stream instead
            _ => match session.reliable_tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    if channel == Channel::Reliable {
                        warn!(player_id = %to, "Reliable queue full, disconnecting");
                        session.kick.notify_one();
                    }
                    Err(SendError::QueueFull(to))
                }
                Err(TrySendError::Closed(_)) => Err(SendError::ChannelClosed(to)),
            },
        }
    }
}

/// One captured send
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: PlayerId,
    pub channel: Channel,
    pub msg: ServerMsg,
}

/// Outbox that records every message; used by tests and offline tooling
#[derive(Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far
    pub fn take(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Outbox for RecordingOutbox {
    fn send(&self, to: PlayerId, channel: Channel, msg: &ServerMsg) -> Result<(), SendError> {
        msg.encode()?;
        self.sent.lock().push(SentMessage {
            to,
            channel,
            msg: msg.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::parse_frame;
    use crate::net::session::RELIABLE_QUEUE_LEN;

    #[test]
    fn unreliable_falls_back_to_stream_until_udp_bound() {
        let sessions = Arc::new(SessionRegistry::new());
        let (udp_tx, mut udp_rx) = mpsc::channel(UDP_QUEUE_LEN);
        let outbox = NetOutbox::new(sessions.clone(), udp_tx);
        let (id, token, mut reliable_rx) = sessions.register("127.0.0.1:5000".parse().unwrap());

        let msg = ServerMsg::PlayerHealth {
            player_id: id,
            health: 50.0,
        };
        outbox.send(id, Channel::Unreliable, &msg).unwrap();
        let frame = parse_frame(reliable_rx.try_recv().unwrap()).unwrap();
        assert_eq!(ServerMsg::decode(&frame).unwrap(), msg);
        assert!(udp_rx.try_recv().is_err());

        let addr: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        assert!(sessions.bind_udp(id, token, addr));
        outbox.send(id, Channel::Unreliable, &msg).unwrap();
        let (to, _) = udp_rx.try_recv().unwrap();
        assert_eq!(to, addr);
    }

    #[test]
    fn unknown_player_is_reported() {
        let (udp_tx, _udp_rx) = mpsc::channel(UDP_QUEUE_LEN);
        let outbox = NetOutbox::new(Arc::new(SessionRegistry::new()), udp_tx);
        let err = outbox
            .send(PlayerId(4), Channel::Reliable, &ServerMsg::Ping { stamp: 0 })
            .unwrap_err();
        assert!(matches!(err, SendError::UnknownPlayer(PlayerId(4))));
    }

    #[test]
    fn full_datagram_queue_drops_and_counts() {
        let sessions = Arc::new(SessionRegistry::new());
        let (udp_tx, _udp_rx) = mpsc::channel(1);
        let outbox = NetOutbox::new(sessions.clone(), udp_tx);
        let (id, token, _reliable_rx) = sessions.register("127.0.0.1:5000".parse().unwrap());
        assert!(sessions.bind_udp(id, token, "127.0.0.1:6000".parse().unwrap()));

        let msg = ServerMsg::Ping { stamp: 1 };
        outbox.send(id, Channel::Unreliable, &msg).unwrap();
        let err = outbox.send(id, Channel::Unreliable, &msg).unwrap_err();
        assert!(matches!(err, SendError::QueueFull(p) if p == id));
        assert_eq!(outbox.dropped(), 1);
        assert!(sessions.get(id).is_some());
    }

    #[tokio::test]
    async fn full_stream_queue_kicks_the_player() {
        let sessions = Arc::new(SessionRegistry::new());
        let (udp_tx, _udp_rx) = mpsc::channel(UDP_QUEUE_LEN);
        let outbox = NetOutbox::new(sessions.clone(), udp_tx);
        let (id, _, _reliable_rx) = sessions.register("127.0.0.1:5000".parse().unwrap());
        let kick = sessions.get(id).unwrap().kick;

        let msg = ServerMsg::Ping { stamp: 1 };
        for _ in 0..RELIABLE_QUEUE_LEN {
            outbox.send(id, Channel::Reliable, &msg).unwrap();
        }
        let err = outbox.send(id, Channel::Reliable, &msg).unwrap_err();
        assert!(matches!(err, SendError::QueueFull(p) if p == id));
        assert_eq!(outbox.dropped(), 1);

        // The permit is stored, so this completes immediately
        kick.notified().await;
    }
}
