//! Replication dirty tracking
//!
//! Each tracked actor remembers the transform last broadcast for it. Every tick the live
//! transform is compared against that, and only actors that moved or rotated past an
//! epsilon are sent, unless a full send is forced.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::net::outbox::{Channel, Outbox, SendError};
use crate::net::protocol::ServerMsg;
use crate::util::time::TICKS_PER_SECOND;

use super::types::{ActorId, PlayerId, Transform};
use super::world::ActorTransforms;

/// Minimum position change (units) that marks an actor moved
pub const POSITION_EPSILON: f32 = 0.01;
/// Minimum rotation change (radians) that marks an actor rotated
pub const ROTATION_EPSILON: f32 = 0.01;
/// Full resync period so lost datagrams are eventually corrected
pub const FORCE_RESYNC_INTERVAL_TICKS: u32 = TICKS_PER_SECOND * 5;

/// Replication state for one networked actor
#[derive(Debug, Clone)]
pub struct ReplicatedActor {
    pub id: ActorId,
    pub last_broadcast: Transform,
    pub moved: bool,
    pub rotated: bool,
    current: Transform,
}

impl ReplicatedActor {
    fn new(id: ActorId, transform: Transform) -> Self {
        Self {
            id,
            last_broadcast: transform,
            moved: false,
            rotated: false,
            current: transform,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.moved || self.rotated
    }

    fn refresh(&mut self, current: Transform) {
        self.current = current;
        self.moved = current.position.distance(self.last_broadcast.position) > POSITION_EPSILON;
        self.rotated =
            current.rotation.angle_between(self.last_broadcast.rotation) > ROTATION_EPSILON;
    }

    /// Messages describing this actor; `full` ignores the dirty flags
    fn messages(&self, full: bool) -> Vec<ServerMsg> {
        let Transform { position, rotation } = self.current;
        match self.id {
            ActorId::Player(player_id) => {
                let mut out = Vec::with_capacity(2);
                if full || self.moved {
                    out.push(ServerMsg::PlayerPosition {
                        player_id,
                        position,
                    });
                }
                if full || self.rotated {
                    out.push(ServerMsg::PlayerRotation {
                        player_id,
                        rotation,
                    });
                }
                out
            }
            ActorId::Prop(actor_id) => vec![ServerMsg::ActorTransform {
                actor_id,
                position,
                rotation,
            }],
        }
    }
}

/// Dirty tracker over all replicated actors
#[derive(Debug, Default)]
pub struct ReplicationTracker {
    actors: BTreeMap<ActorId, ReplicatedActor>,
    ticks_since_resync: u32,
    force_pending: bool,
}

impl ReplicationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start replicating an actor from its current transform
    pub fn track(&mut self, id: ActorId, transform: Transform) {
        self.actors.insert(id, ReplicatedActor::new(id, transform));
    }

    pub fn untrack(&mut self, id: ActorId) -> bool {
        self.actors.remove(&id).is_some()
    }

    pub fn get(&self, id: ActorId) -> Option<&ReplicatedActor> {
        self.actors.get(&id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Request a full send on the next replication step
    pub fn force_next(&mut self) {
        self.force_pending = true;
    }

    /// Whether this tick's send must be full; counts toward the periodic resync
    pub fn take_force(&mut self) -> bool {
        self.ticks_since_resync += 1;
        if self.force_pending || self.ticks_since_resync >= FORCE_RESYNC_INTERVAL_TICKS {
            self.force_pending = false;
            self.ticks_since_resync = 0;
            true
        } else {
            false
        }
    }

    /// Recompute moved/rotated flags from the live world.
    /// Actors missing from the world keep their previous state.
    pub fn update<W: ActorTransforms>(&mut self, world: &W) {
        for actor in self.actors.values_mut() {
            if let Some(current) = world.transform(actor.id) {
                actor.refresh(current);
            }
        }
    }

    /// Send actors to every recipient over the unreliable channel.
    ///
    /// With `force` every actor is sent; otherwise only dirty ones. A player's own actor
    /// is not sent back to that player. Flags are cleared and `last_broadcast` advanced
    /// for every actor handed to the transport. Returns the ids sent.
    pub fn send_all(
        &mut self,
        force: bool,
        outbox: &dyn Outbox,
        recipients: &[PlayerId],
    ) -> Vec<ActorId> {
        let mut sent = Vec::new();

        for actor in self.actors.values_mut() {
            if !force && !actor.is_dirty() {
                continue;
            }

            let mut failed = false;
            for msg in actor.messages(force) {
                for &to in recipients {
                    if actor.id == ActorId::Player(to) {
                        continue;
                    }
                    match outbox.send(to, Channel::Unreliable, &msg) {
                        Ok(()) => {}
                        Err(SendError::UnknownPlayer(_)) | Err(SendError::ChannelClosed(_)) => {
                            debug!(player_id = %to, "Recipient gone during replication");
                        }
                        // The periodic resync covers what a congested client missed
                        Err(SendError::QueueFull(_)) => {
                            debug!(player_id = %to, "Recipient queue full, update dropped");
                        }
                        Err(e) => {
                            warn!(actor = %actor.id, error = %e, "Dropping replication message");
                            failed = true;
                        }
                    }
                }
            }

            if !failed {
                actor.last_broadcast = actor.current;
                actor.moved = false;
                actor.rotated = false;
                sent.push(actor.id);
            }
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{Body, World};
    use crate::net::outbox::RecordingOutbox;
    use glam::{Quat, Vec3};

    const VIEWER: PlayerId = PlayerId(9);

    fn setup() -> (World, ReplicationTracker) {
        let mut world = World::new();
        let mut tracker = ReplicationTracker::new();
        for id in [ActorId::Prop(1), ActorId::Prop(2), ActorId::Player(PlayerId(3))] {
            world.insert(id, Body::new(Transform::IDENTITY, 0.5, 0.5));
            tracker.track(id, Transform::IDENTITY);
        }
        (world, tracker)
    }

    #[test]
    fn forced_send_emits_everything() {
        let (world, mut tracker) = setup();
        tracker.update(&world);
        let outbox = RecordingOutbox::new();
        let sent = tracker.send_all(true, &outbox, &[VIEWER]);
        assert_eq!(sent.len(), 3);
        // two props + position and rotation for the player
        assert_eq!(outbox.take().len(), 4);
    }

    #[test]
    fn unforced_send_emits_only_dirty_and_clears_flags() {
        let (mut world, mut tracker) = setup();
        world.set_transform(ActorId::Prop(2), Transform::at(Vec3::new(1.0, 0.0, 0.0)));
        world.set_transform(
            ActorId::Player(PlayerId(3)),
            Transform::new(Vec3::ZERO, Quat::from_rotation_y(1.0)),
        );
        tracker.update(&world);
        assert!(tracker.get(ActorId::Prop(2)).unwrap().moved);
        assert!(!tracker.get(ActorId::Prop(1)).unwrap().is_dirty());

        let outbox = RecordingOutbox::new();
        let sent = tracker.send_all(false, &outbox, &[VIEWER]);
        assert_eq!(sent, vec![ActorId::Player(PlayerId(3)), ActorId::Prop(2)]);

        let msgs: Vec<ServerMsg> = outbox.take().into_iter().map(|m| m.msg).collect();
        assert!(matches!(msgs[0], ServerMsg::PlayerRotation { .. }));
        assert!(matches!(msgs[1], ServerMsg::ActorTransform { actor_id: 2, .. }));
        assert_eq!(msgs.len(), 2);

        assert!(!tracker.get(ActorId::Prop(2)).unwrap().is_dirty());
        tracker.update(&world);
        assert!(tracker.send_all(false, &outbox, &[VIEWER]).is_empty());
    }

    #[test]
    fn movement_below_epsilon_is_ignored() {
        let (mut world, mut tracker) = setup();
        world.set_transform(
            ActorId::Prop(1),
            Transform::at(Vec3::new(POSITION_EPSILON * 0.5, 0.0, 0.0)),
        );
        tracker.update(&world);
        assert!(!tracker.get(ActorId::Prop(1)).unwrap().is_dirty());
    }

    #[test]
    fn own_actor_is_not_echoed() {
        let (world, mut tracker) = setup();
        tracker.update(&world);
        let outbox = RecordingOutbox::new();
        tracker.send_all(true, &outbox, &[PlayerId(3)]);
        assert!(outbox
            .take()
            .iter()
            .all(|m| !matches!(m.msg, ServerMsg::PlayerPosition { .. })));
    }

    #[test]
    fn periodic_resync_forces_send() {
        let mut tracker = ReplicationTracker::new();
        let forced = (0..FORCE_RESYNC_INTERVAL_TICKS)
            .filter(|_| tracker.take_force())
            .count();
        assert_eq!(forced, 1);
        tracker.force_next();
        assert!(tracker.take_force());
        assert!(!tracker.take_force());
    }
}
