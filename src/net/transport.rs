//! Socket tasks: TCP for the reliable channel, UDP for the unreliable one
//!
//! Connection tasks never touch simulation state. They decode frames into the input
//! ingress and forward outbound frames queued by the outbox.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::app::ServerState;
use crate::game::ingress::{InputIngress, Submitted};
use crate::game::types::PlayerId;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::TICKS_PER_SECOND;

use super::codec::{parse_frame, Frame, FrameDecoder, MAX_FRAME_LEN};
use super::protocol::{ProtocolError, ServerMsg, PROTOCOL_VERSION};
use super::session::SessionRegistry;

/// Bytes in the datagram header: player id and UDP token
const DATAGRAM_HEADER_LEN: usize = 4 + 8;
const READ_BUFFER_LEN: usize = 8 * 1024;

/// Reasons a connection is closed
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt stream: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Accept reliable-channel connections until the listener fails
pub async fn serve_tcp(listener: TcpListener, state: ServerState) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };

        if state.sessions.len() >= state.config.max_players {
            warn!(
                peer = %peer,
                max_players = state.config.max_players,
                "Server full, refusing connection"
            );
            drop(stream);
            continue;
        }

        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, state).await;
        });
    }
}

/// Run one reliable-channel connection to completion
async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: ServerState) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (player_id, udp_token, mut reliable_rx) = state.sessions.register(peer);
    let Some(session) = state.sessions.get(player_id) else {
        return;
    };
    let reply_tx = session.reliable_tx;
    state.ingress.register_player(player_id);
    info!(player_id = %player_id, peer = %peer, "New connection");

    let (reader, mut writer) = stream.into_split();

    // Writer task: outbound frames -> socket
    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = reliable_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!(player_id = %player_id, error = %e, "Stream write failed");
                break;
            }
        }
    });

    let welcome = ServerMsg::Welcome {
        player_id,
        protocol_version: PROTOCOL_VERSION,
        tick: state.tick(),
        tick_rate: TICKS_PER_SECOND,
        udp_token,
    };
    send_reply(&reply_tx, player_id, &welcome);

    let limiter = ConnectionRateLimiter::new();
    tokio::select! {
        result = read_frames(reader, player_id, &state.ingress, &limiter, &reply_tx) => {
            match result {
                Ok(()) => info!(player_id = %player_id, "Client closed connection"),
                Err(e) => warn!(player_id = %player_id, error = %e, "Connection dropped"),
            }
        }
        _ = session.kick.notified() => {
            warn!(player_id = %player_id, "Client fell behind, closing connection");
        }
    }

    // The simulation picks up the departure on its next tick
    state.ingress.remove_player(player_id);
    state.sessions.unregister(player_id);
    writer_handle.abort();
}

/// Read frames from a stream into the ingress until EOF.
///
/// Pings are answered directly on `reply_tx`. A corrupt length prefix ends the stream.
pub async fn read_frames<R>(
    mut reader: R,
    player_id: PlayerId,
    ingress: &InputIngress,
    limiter: &ConnectionRateLimiter,
    reply_tx: &mpsc::Sender<Bytes>,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_LEN];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(frame) = decoder.next_frame()? {
            if let Some(reply) = dispatch_frame(player_id, &frame, ingress, limiter) {
                send_reply(reply_tx, player_id, &reply);
            }
        }
    }
}

/// Rate-limit and submit one frame; returns a direct reply if one is owed
fn dispatch_frame(
    player_id: PlayerId,
    frame: &Frame,
    ingress: &InputIngress,
    limiter: &ConnectionRateLimiter,
) -> Option<ServerMsg> {
    if !limiter.check_input() {
        warn!(player_id = %player_id, opcode = frame.opcode, "Rate limited input frame");
        return None;
    }
    match ingress.submit(player_id, frame) {
        Submitted::Ping { stamp } => Some(ServerMsg::Ping { stamp }),
        Submitted::Queued | Submitted::Dropped(_) => None,
    }
}

fn send_reply(tx: &mpsc::Sender<Bytes>, player_id: PlayerId, msg: &ServerMsg) {
    match msg.encode() {
        Ok(frame) => match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(player_id = %player_id, "Writer congested, reply dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(player_id = %player_id, "Writer gone, reply dropped");
            }
        },
        Err(e) => warn!(player_id = %player_id, error = %e, "Failed to encode reply"),
    }
}

/// Split a client datagram into player id, UDP token and frame
pub fn parse_datagram(mut data: Bytes) -> Result<(PlayerId, u64, Frame), ProtocolError> {
    if data.len() < DATAGRAM_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: DATAGRAM_HEADER_LEN,
            available: data.len(),
        });
    }
    let player_id = PlayerId(data.get_u32_le());
    let token = data.get_u64_le();
    let frame = parse_frame(data)?;
    Ok((player_id, token, frame))
}

/// Receive unreliable-channel datagrams until the socket fails
pub async fn serve_udp(socket: Arc<UdpSocket>, state: ServerState) {
    let mut buf = vec![0u8; DATAGRAM_HEADER_LEN + 4 + MAX_FRAME_LEN];
    let mut limiters: HashMap<PlayerId, ConnectionRateLimiter> = HashMap::new();

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from departed clients surface here; keep serving
                debug!(error = %e, "UDP receive error");
                continue;
            }
        };

        let (player_id, token, frame) = match parse_datagram(Bytes::copy_from_slice(&buf[..n])) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(from = %from, error = %e, "Dropping malformed datagram");
                continue;
            }
        };

        if !state.sessions.bind_udp(player_id, token, from) {
            limiters.remove(&player_id);
            debug!(player_id = %player_id, from = %from, "Dropping unauthenticated datagram");
            continue;
        }

        if !limiters.contains_key(&player_id) {
            prune_limiters(&mut limiters, &state.sessions);
        }
        let limiter = limiters.entry(player_id).or_default();
        if let Some(reply) = dispatch_frame(player_id, &frame, &state.ingress, limiter) {
            if let Some(session) = state.sessions.get(player_id) {
                send_reply(&session.reliable_tx, player_id, &reply);
            }
        }
    }
}

/// Forget limiters of players whose session has ended
fn prune_limiters(
    limiters: &mut HashMap<PlayerId, ConnectionRateLimiter>,
    sessions: &SessionRegistry,
) {
    limiters.retain(|id, _| sessions.contains(*id));
}

/// Drain outbound datagrams queued by the outbox
pub async fn send_udp(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<(SocketAddr, Bytes)>) {
    while let Some((addr, frame)) = rx.recv().await {
        if let Err(e) = socket.send_to(&frame, addr).await {
            debug!(addr = %addr, error = %e, "UDP send failed");
        }
    }
}
