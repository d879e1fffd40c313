//! Authoritative state broadcasting

use glam::{Quat, Vec3};
use tracing::{debug, warn};

use crate::net::outbox::{Channel, Outbox, SendError};
use crate::net::protocol::{AuthoritativeState, ServerMsg};

use super::types::PlayerId;

/// Counters for the periodic status line
#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastStats {
    pub sent: u64,
    pub dropped: u64,
}

/// Sends input acknowledgments and fans out shared events
#[derive(Debug, Default)]
pub struct StateBroadcaster {
    stats: BroadcastStats,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    /// Acknowledge processed input to its owner over the reliable channel
    pub fn acknowledge(
        &mut self,
        outbox: &dyn Outbox,
        player: PlayerId,
        state: AuthoritativeState,
    ) {
        self.send(outbox, player, Channel::Reliable, &ServerMsg::InputProcessed(state));
    }

    /// Publish a player's look orientation and movement vector to everyone else
    pub fn publish_orientation(
        &mut self,
        outbox: &dyn Outbox,
        recipients: &[PlayerId],
        player: PlayerId,
        orientation: Quat,
        movement: Vec3,
    ) {
        let msg = ServerMsg::PlayerMovementVector {
            player_id: player,
            orientation,
            movement,
        };
        self.broadcast(outbox, recipients, Channel::Unreliable, &msg, Some(player));
    }

    /// Send to every recipient except `except`
    pub fn broadcast(
        &mut self,
        outbox: &dyn Outbox,
        recipients: &[PlayerId],
        channel: Channel,
        msg: &ServerMsg,
        except: Option<PlayerId>,
    ) {
        for &to in recipients {
            if Some(to) != except {
                self.send(outbox, to, channel, msg);
            }
        }
    }

    /// Fire-and-forget send; failures are logged and counted, never propagated
    pub fn send(&mut self, outbox: &dyn Outbox, to: PlayerId, channel: Channel, msg: &ServerMsg) {
        match outbox.send(to, channel, msg) {
            Ok(()) => self.stats.sent += 1,
            Err(e @ (SendError::UnknownPlayer(_) | SendError::ChannelClosed(_))) => {
                self.stats.dropped += 1;
                debug!(player_id = %to, error = %e, "Skipping send to departed player");
            }
            Err(e @ SendError::QueueFull(_)) => {
                self.stats.dropped += 1;
                debug!(player_id = %to, error = %e, "Congested, message dropped");
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(
                    player_id = %to,
                    opcode = msg.opcode(),
                    error = %e,
                    "Dropping outbound message"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::outbox::RecordingOutbox;

    #[test]
    fn acknowledgment_goes_reliably_to_owner_only() {
        let outbox = RecordingOutbox::new();
        let mut broadcaster = StateBroadcaster::new();
        let state = AuthoritativeState {
            frame_id: 5,
            tick: 20,
            position: Vec3::ONE,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        };
        broadcaster.acknowledge(&outbox, PlayerId(1), state);

        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, PlayerId(1));
        assert_eq!(sent[0].channel, Channel::Reliable);
        assert_eq!(sent[0].msg, ServerMsg::InputProcessed(state));
    }

    #[test]
    fn orientation_skips_the_owner() {
        let outbox = RecordingOutbox::new();
        let mut broadcaster = StateBroadcaster::new();
        let everyone = [PlayerId(1), PlayerId(2), PlayerId(3)];
        broadcaster.publish_orientation(&outbox, &everyone, PlayerId(2), Quat::IDENTITY, Vec3::Z);

        let sent = outbox.take();
        let recipients: Vec<PlayerId> = sent.iter().map(|m| m.to).collect();
        assert_eq!(recipients, vec![PlayerId(1), PlayerId(3)]);
        assert!(sent.iter().all(|m| m.channel == Channel::Unreliable));
        assert_eq!(broadcaster.stats().sent, 2);
    }
}
