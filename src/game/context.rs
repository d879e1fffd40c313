//! Simulation context: every piece of state the tick loop owns

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::net::outbox::SendError;

use super::deadlines::DeadlineQueue;
use super::history::ActorHistoryStore;
use super::player::PlayerState;
use super::replication::ReplicationTracker;
use super::types::{ActorId, PlayerId, Tick, Transform};
use super::world::{ActorTransforms, Body, World};

/// Spawn points are scattered inside this radius around the origin
pub const SPAWN_RADIUS: f32 = 40.0;
const MIN_SPAWN_DISTANCE: f32 = 2.0;

/// Per-player failures inside a tick; logged by the scheduler, never fatal
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Player {0} is not in the simulation")]
    UnknownPlayer(PlayerId),

    #[error("Player {0} disconnected during processing")]
    DisconnectedDuringProcessing(PlayerId),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),
}

/// Simulation state, owned by the scheduler
pub struct SimulationContext {
    pub tick: Tick,
    pub world: World,
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub history: ActorHistoryStore,
    pub replication: ReplicationTracker,
    pub deadlines: DeadlineQueue,
    rng: ChaCha8Rng,
    next_prop_id: u32,
}

impl SimulationContext {
    pub fn new(seed: u64) -> Self {
        Self {
            tick: 0,
            world: World::new(),
            players: BTreeMap::new(),
            history: ActorHistoryStore::new(),
            replication: ReplicationTracker::new(),
            deadlines: DeadlineQueue::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_prop_id: 1,
        }
    }

    /// Add a player without a body; returns false if already present
    pub fn add_player(&mut self, id: PlayerId, username: String) -> bool {
        if self.players.contains_key(&id) {
            return false;
        }
        self.players.insert(id, PlayerState::new(id, username));
        info!(player_id = %id, players = self.players.len(), "Player joined simulation");
        true
    }

    /// Remove a player together with its body, history, replication entry and deadlines
    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerState> {
        let player = self.players.remove(&id)?;
        let actor = ActorId::Player(id);
        self.world.remove(actor);
        self.history.remove(actor);
        self.replication.untrack(actor);
        self.deadlines.cancel_player(id);
        info!(player_id = %id, players = self.players.len(), "Player left simulation");
        Some(player)
    }

    pub fn player(&self, id: PlayerId) -> Result<&PlayerState, SimError> {
        self.players.get(&id).ok_or(SimError::UnknownPlayer(id))
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut PlayerState, SimError> {
        self.players.get_mut(&id).ok_or(SimError::UnknownPlayer(id))
    }

    /// Place (or re-place) a player's body at a fresh spawn point and revive it
    pub fn spawn_player(&mut self, id: PlayerId) -> Result<Transform, SimError> {
        if !self.players.contains_key(&id) {
            return Err(SimError::UnknownPlayer(id));
        }
        let transform = self.generate_spawn_point();
        let actor = ActorId::Player(id);
        self.world.insert(actor, PlayerState::body(transform));
        self.replication.track(actor, transform);
        self.player_mut(id)?.revive();
        Ok(transform)
    }

    /// Generate a spawn transform on the ground plane
    pub fn generate_spawn_point(&mut self) -> Transform {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(MIN_SPAWN_DISTANCE..SPAWN_RADIUS);
        let yaw = self.rng.gen_range(0.0..std::f32::consts::TAU);
        Transform::new(
            Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance),
            Quat::from_rotation_y(yaw),
        )
    }

    /// Add a free prop to the world and start replicating it
    pub fn spawn_prop(&mut self, transform: Transform, radius: f32) -> ActorId {
        let id = ActorId::Prop(self.next_prop_id);
        self.next_prop_id += 1;
        self.world.insert(id, Body::new(transform, radius, radius));
        self.replication.track(id, transform);
        id
    }

    /// Snapshot every tracked actor at the current tick
    pub fn record_history(&mut self) {
        for id in self.world.tracked_actors() {
            if let Some(transform) = self.world.transform(id) {
                self.history.record(id, self.tick, transform);
            }
        }
    }

    /// Players that receive broadcasts, ascending
    pub fn recipients(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Spawned players other than `except`, with their body transforms
    pub fn spawned_players(&self, except: PlayerId) -> Vec<(PlayerId, Transform)> {
        self.players
            .values()
            .filter(|p| p.spawned && p.id != except)
            .filter_map(|p| {
                self.world
                    .transform(ActorId::Player(p.id))
                    .map(|t| (p.id, t))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::deadlines::Deadline;

    #[test]
    fn removal_clears_every_trace() {
        let mut ctx = SimulationContext::new(7);
        let id = PlayerId(1);
        assert!(ctx.add_player(id, "a".into()));
        assert!(!ctx.add_player(id, "a".into()));
        ctx.spawn_player(id).unwrap();
        ctx.record_history();
        ctx.deadlines.schedule(5, Deadline::Respawn { player: id });

        let actor = ActorId::Player(id);
        assert!(ctx.history.contains(actor));
        assert!(ctx.remove_player(id).is_some());
        assert!(!ctx.world.contains(actor));
        assert!(!ctx.history.contains(actor));
        assert!(ctx.replication.get(actor).is_none());
        assert!(ctx.deadlines.is_empty());
        assert!(ctx.remove_player(id).is_none());
    }

    #[test]
    fn spawn_points_are_seeded() {
        let mut a = SimulationContext::new(42);
        let mut b = SimulationContext::new(42);
        for _ in 0..5 {
            let (pa, pb) = (a.generate_spawn_point(), b.generate_spawn_point());
            assert_eq!(pa, pb);
            assert_eq!(pa.position.y, 0.0);
            assert!(pa.position.length() < SPAWN_RADIUS);
        }
    }

    #[test]
    fn spawning_unknown_player_fails() {
        let mut ctx = SimulationContext::new(1);
        assert!(matches!(
            ctx.spawn_player(PlayerId(3)),
            Err(SimError::UnknownPlayer(PlayerId(3)))
        ));
    }
}
