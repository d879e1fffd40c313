//! Fixed-rate tick scheduler
//!
//! One call to [`TickScheduler::tick`] is one indivisible logical tick:
//! departures and deadlines, ingress drain, actions, lag-compensated shots, movement,
//! world step, history snapshot, replication, acknowledgments, then the tick advances.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::{Quat, Vec3};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::net::outbox::{Channel, Outbox};
use crate::net::protocol::{AuthoritativeState, HitType, ServerMsg};
use crate::util::time::{
    tick_delta, tick_period, uptime_secs, Timer, TICKS_PER_SECOND, TICK_DURATION_MICROS,
};

use super::broadcast::StateBroadcaster;
use super::collaborators::{Collaborators, SlotUpdate};
use super::combat::{apply_damage, FireClearance, WeaponStats};
use super::context::{SimError, SimulationContext};
use super::deadlines::Deadline;
use super::ingress::{InputIngress, PlayerBatch};
use super::player::{MovementStats, EYE_HEIGHT};
use super::rewind::{cast_from_shooter, RewindEngine};
use super::types::{
    ActorId, HitScanEvent, InputCommand, PlayerAction, PlayerId, ShotRequest, Tick, Transform,
};
use super::world::{ActorTransforms, RayHit, RayTarget};

/// Ticks between status log lines
pub const STATUS_LOG_INTERVAL_TICKS: Tick = TICKS_PER_SECOND * 30;
/// Delay between death and respawn
pub const RESPAWN_DELAY_TICKS: Tick = TICKS_PER_SECOND * 3;
/// Upper bound on any hit-scan ray
pub const MAX_SHOT_DISTANCE: f32 = 1000.0;
/// Velocity added to a prop struck by a shot
const PROP_IMPULSE: f32 = 4.0;
const SHOT_VOLUME: f32 = 1.0;
const SHOT_MIN_DISTANCE: f32 = 1.0;
const SHOT_MAX_DISTANCE: f32 = 150.0;
const PROP_RADIUS: f32 = 0.5;

/// Unrecoverable wiring errors found before the loop starts
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// What one tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// The tick that was simulated
    pub tick: Tick,
    pub players: usize,
    pub inputs: usize,
    pub shots: usize,
    pub replicated: usize,
    /// Per-player failures that were logged and skipped
    pub errors: usize,
}

/// Builder for [`TickScheduler`]; outbox and ingress are required
pub struct SchedulerBuilder {
    outbox: Option<Arc<dyn Outbox>>,
    ingress: Option<Arc<InputIngress>>,
    collaborators: Collaborators,
    movement: MovementStats,
    seed: Option<u64>,
    props: usize,
    tick_counter: Option<Arc<AtomicU32>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            outbox: None,
            ingress: None,
            collaborators: Collaborators::default(),
            movement: MovementStats::default(),
            seed: None,
            props: 0,
            tick_counter: None,
        }
    }

    pub fn outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn ingress(mut self, ingress: Arc<InputIngress>) -> Self {
        self.ingress = Some(ingress);
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn movement(mut self, movement: MovementStats) -> Self {
        self.movement = movement;
        self
    }

    /// Seed for spawn points; random when unset
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of free props scattered at startup
    pub fn props(mut self, count: usize) -> Self {
        self.props = count;
        self
    }

    /// Counter the scheduler publishes its tick to, read by connection tasks
    pub fn tick_counter(mut self, counter: Arc<AtomicU32>) -> Self {
        self.tick_counter = Some(counter);
        self
    }

    pub fn build(self) -> Result<TickScheduler, StartupError> {
        let outbox = self
            .outbox
            .ok_or(StartupError::MissingCollaborator("outbox"))?;
        let ingress = self
            .ingress
            .ok_or(StartupError::MissingCollaborator("input ingress"))?;

        let seed = self.seed.unwrap_or_else(rand::random);
        let mut ctx = SimulationContext::new(seed);
        for _ in 0..self.props {
            let spot = ctx.generate_spawn_point();
            ctx.spawn_prop(
                Transform::at(spot.position + Vec3::Y * PROP_RADIUS * 4.0),
                PROP_RADIUS,
            );
        }
        info!(seed, props = self.props, "Simulation context created");

        Ok(TickScheduler {
            ctx,
            ingress,
            outbox,
            collaborators: self.collaborators,
            rewind: RewindEngine::new(),
            broadcaster: StateBroadcaster::new(),
            movement: self.movement,
            tick_counter: self.tick_counter,
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledgment queued until after replication
struct PendingAck {
    player: PlayerId,
    state: AuthoritativeState,
    look: Quat,
    movement: Vec3,
}

/// The authoritative simulation loop
pub struct TickScheduler {
    ctx: SimulationContext,
    ingress: Arc<InputIngress>,
    outbox: Arc<dyn Outbox>,
    collaborators: Collaborators,
    rewind: RewindEngine,
    broadcaster: StateBroadcaster,
    movement: MovementStats,
    tick_counter: Option<Arc<AtomicU32>>,
}

impl TickScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn current_tick(&self) -> Tick {
        self.ctx.tick
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SimulationContext {
        &mut self.ctx
    }

    /// Run the fixed-rate loop until `shutdown` resolves.
    ///
    /// Ticks that fall behind are skipped, never queued, so the loop never runs two ticks
    /// back to back to catch up.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(tick_rate = TICKS_PER_SECOND, "Simulation started");

        let mut tick_interval = interval(tick_period());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(tick = self.ctx.tick, "Simulation stopping");
                    break;
                }
                _ = tick_interval.tick() => {
                    let timer = Timer::new();
                    let report = self.tick();
                    let elapsed_us = timer.elapsed_micros();

                    if elapsed_us > TICK_DURATION_MICROS {
                        warn!(tick = report.tick, elapsed_us, "Tick overran its period");
                    }
                    if report.tick % STATUS_LOG_INTERVAL_TICKS == 0 {
                        let stats = self.broadcaster.stats();
                        info!(
                            tick = report.tick,
                            players = report.players,
                            actors = self.ctx.world.len(),
                            sent = stats.sent,
                            dropped = stats.dropped,
                            uptime_secs = uptime_secs(),
                            "Simulation status"
                        );
                    }
                }
            }
        }
    }

    /// Simulate exactly one tick
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            tick: self.ctx.tick,
            ..TickReport::default()
        };

        for player in self.ingress.take_departures() {
            self.handle_departure(player);
        }

        for deadline in self.ctx.deadlines.pop_due(self.ctx.tick) {
            let player = deadline.player();
            if let Err(e) = self.handle_deadline(deadline) {
                report.errors += 1;
                log_player_error(player, &e);
            }
        }

        let mut batches: Vec<(PlayerId, PlayerBatch)> = Vec::new();
        for player in self.ingress.players() {
            match self.ingress.drain_all(player) {
                Some(batch) => batches.push((player, batch)),
                // Queue removed between listing and draining; the departure arrives next tick
                None => log_player_error(player, &SimError::DisconnectedDuringProcessing(player)),
            }
        }

        for (player, batch) in batches.iter_mut() {
            for action in batch.actions.drain(..) {
                if let Err(e) = self.handle_action(*player, action) {
                    report.errors += 1;
                    log_player_error(*player, &e);
                }
            }
        }

        for (player, batch) in &batches {
            for shot in &batch.shots {
                report.shots += 1;
                if let Err(e) = self.handle_shot(*player, *shot) {
                    report.errors += 1;
                    log_player_error(*player, &e);
                }
            }
        }

        let mut acks = Vec::new();
        for (player, batch) in &batches {
            if batch.inputs.is_empty() {
                continue;
            }
            report.inputs += batch.inputs.len();
            match self.apply_movement(*player, &batch.inputs) {
                Ok(Some(ack)) => acks.push(ack),
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    log_player_error(*player, &e);
                }
            }
        }

        self.ctx.world.step();
        self.ctx.record_history();

        let recipients = self.ctx.recipients();
        self.ctx.replication.update(&self.ctx.world);
        let force = self.ctx.replication.take_force();
        report.replicated = self
            .ctx
            .replication
            .send_all(force, self.outbox.as_ref(), &recipients)
            .len();

        for ack in acks {
            self.broadcaster
                .acknowledge(self.outbox.as_ref(), ack.player, ack.state);
            self.broadcaster.publish_orientation(
                self.outbox.as_ref(),
                &recipients,
                ack.player,
                ack.look,
                ack.movement,
            );
        }

        report.players = self.ctx.players.len();
        self.ctx.tick += 1;
        if let Some(counter) = &self.tick_counter {
            counter.store(self.ctx.tick, Ordering::Relaxed);
        }
        report
    }

    fn handle_departure(&mut self, player: PlayerId) {
        if self.ctx.remove_player(player).is_none() {
            // Never joined the simulation
            return;
        }
        self.collaborators.weapons.forget(player);
        self.collaborators.inventory.forget(player);

        let recipients = self.ctx.recipients();
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            &recipients,
            Channel::Reliable,
            &ServerMsg::PlayerDisconnected { player_id: player },
            None,
        );
    }

    fn handle_deadline(&mut self, deadline: Deadline) -> Result<(), SimError> {
        match deadline {
            Deadline::ReloadComplete { player, token } => {
                if self.collaborators.weapons.finish_reload(player, token) {
                    debug!(player_id = %player, "Reload complete");
                }
                Ok(())
            }
            Deadline::Respawn { player } => {
                let transform = self.ctx.spawn_player(player)?;
                self.collaborators.weapons.equip(player);
                info!(player_id = %player, "Player respawned");

                let recipients = self.ctx.recipients();
                self.broadcaster.broadcast(
                    self.outbox.as_ref(),
                    &recipients,
                    Channel::Reliable,
                    &ServerMsg::PlayerRespawned {
                        player_id: player,
                        position: transform.position,
                        rotation: transform.rotation,
                    },
                    None,
                );
                self.broadcast_health(player, &recipients)?;
                Ok(())
            }
        }
    }

    fn handle_action(&mut self, player: PlayerId, action: PlayerAction) -> Result<(), SimError> {
        match action {
            PlayerAction::JoinAck { username } => self.handle_join(player, username),
            PlayerAction::SpawnRequest => self.handle_spawn(player),
            PlayerAction::Ready => {
                self.ctx.player_mut(player)?.ready = true;
                self.ctx.replication.force_next();
                Ok(())
            }
            PlayerAction::WeaponSwitch { index } => {
                self.ctx.player(player)?;
                if !self.collaborators.weapons.switch(player, index) {
                    debug!(player_id = %player, index, "Rejected weapon switch");
                }
                Ok(())
            }
            PlayerAction::Reload => {
                if !self.ctx.player(player)?.alive {
                    return Ok(());
                }
                let reload = self.collaborators.weapons.begin_reload(player, self.ctx.tick);
                if let Some((due, token)) = reload {
                    self.ctx
                        .deadlines
                        .schedule(due, Deadline::ReloadComplete { player, token });
                }
                Ok(())
            }
            PlayerAction::CancelReload => {
                self.ctx.player(player)?;
                self.collaborators.weapons.cancel_reload(player);
                Ok(())
            }
            PlayerAction::TransferSlot { from, to, mode } => {
                self.ctx.player(player)?;
                let updates = self
                    .collaborators
                    .inventory
                    .transfer_slot(player, &from, &to, mode);
                self.send_slot_updates(player, updates)
            }
            PlayerAction::ReduceItem { item_id, amount } => {
                self.ctx.player(player)?;
                let updates = self
                    .collaborators
                    .inventory
                    .reduce_item(player, &item_id, amount);
                self.send_slot_updates(player, updates)
            }
            PlayerAction::KillSelf => {
                if self.ctx.player(player)?.alive {
                    info!(player_id = %player, "Player killed themselves");
                    self.kill_player(player)?;
                }
                Ok(())
            }
        }
    }

    fn handle_join(&mut self, player: PlayerId, username: String) -> Result<(), SimError> {
        if !self.ctx.add_player(player, username.clone()) {
            debug!(player_id = %player, "Duplicate join acknowledgment");
            return Ok(());
        }

        // Tell the newcomer who is already here
        let existing: Vec<ServerMsg> = self
            .ctx
            .players
            .values()
            .filter(|p| p.id != player)
            .map(|p| ServerMsg::PlayerConnected {
                player_id: p.id,
                username: p.username.clone(),
            })
            .collect();
        for msg in &existing {
            self.outbox.send(player, Channel::Reliable, msg)?;
        }

        let recipients = self.ctx.recipients();
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            &recipients,
            Channel::Reliable,
            &ServerMsg::PlayerConnected {
                player_id: player,
                username,
            },
            None,
        );
        Ok(())
    }

    fn handle_spawn(&mut self, player: PlayerId) -> Result<(), SimError> {
        let state = self.ctx.player(player)?;
        if state.spawned {
            debug!(player_id = %player, alive = state.alive, "Ignoring spawn request");
            return Ok(());
        }

        let transform = self.ctx.spawn_player(player)?;
        self.collaborators.weapons.equip(player);
        info!(player_id = %player, position = ?transform.position, "Player spawned");

        let recipients = self.ctx.recipients();
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            &recipients,
            Channel::Reliable,
            &ServerMsg::SpawnPlayer {
                player_id: player,
                position: transform.position,
                rotation: transform.rotation,
            },
            None,
        );

        for (other, t) in self.ctx.spawned_players(player) {
            let msg = ServerMsg::SpawnPlayer {
                player_id: other,
                position: t.position,
                rotation: t.rotation,
            };
            self.outbox.send(player, Channel::Reliable, &msg)?;
        }
        Ok(())
    }

    /// Gate one shot through the weapon provider, then resolve it against the past
    fn handle_shot(&mut self, player: PlayerId, request: ShotRequest) -> Result<(), SimError> {
        if !self.ctx.player(player)?.alive {
            debug!(player_id = %player, "Dead player cannot shoot");
            return Ok(());
        }

        let weapon = match self.collaborators.weapons.try_fire(player, self.ctx.tick) {
            FireClearance::Cleared(weapon) => weapon,
            refused => {
                debug!(player_id = %player, reason = ?refused, "Shot refused");
                return Ok(());
            }
        };

        let event = HitScanEvent::new(player, request);
        let range = weapon.range.min(MAX_SHOT_DISTANCE);
        let hit = self.rewind.resolve(
            &mut self.ctx.world,
            &self.ctx.history,
            &event,
            self.ctx.tick,
            |world, e| cast_from_shooter(world, e, EYE_HEIGHT, range),
        );

        self.ctx.player_mut(player)?.shots_fired += 1;
        self.play_shot_audio(player, &weapon);

        match hit {
            Some(hit) => {
                debug!(
                    player_id = %player,
                    target = ?hit.target,
                    distance = hit.distance,
                    "Shot hit"
                );
                self.apply_impact(player, &weapon, &event, hit)
            }
            None => Ok(()),
        }
    }

    fn apply_impact(
        &mut self,
        shooter: PlayerId,
        weapon: &WeaponStats,
        event: &HitScanEvent,
        hit: RayHit,
    ) -> Result<(), SimError> {
        let hit_type = match hit.target {
            RayTarget::Actor(ActorId::Player(target)) => {
                self.damage_player(shooter, target, weapon.damage)?;
                HitType::Player
            }
            RayTarget::Actor(actor @ ActorId::Prop(_)) => {
                if let Some(body) = self.ctx.world.body_mut(actor) {
                    body.velocity += event.direction * PROP_IMPULSE;
                }
                HitType::Prop
            }
            RayTarget::World => HitType::World,
        };

        let recipients = self.ctx.recipients();
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            &recipients,
            Channel::Unreliable,
            &ServerMsg::SpawnHitObject {
                hit_type,
                point: hit.point,
                normal: hit.normal,
            },
            None,
        );
        Ok(())
    }

    fn damage_player(
        &mut self,
        shooter: PlayerId,
        target: PlayerId,
        damage: f32,
    ) -> Result<(), SimError> {
        let victim = self.ctx.player_mut(target)?;
        if !victim.alive {
            return Ok(());
        }
        let (health, killed) = apply_damage(victim.health, damage);
        victim.health = health;

        if let Some(attacker) = self.ctx.players.get_mut(&shooter) {
            attacker.shots_hit += 1;
            if killed {
                attacker.kills += 1;
            }
        }

        if killed {
            info!(killer_id = %shooter, victim_id = %target, "Player killed");
            self.kill_player(target)
        } else {
            let recipients = self.ctx.recipients();
            self.broadcast_health(target, &recipients)
        }
    }

    /// Mark dead, cancel reloads, schedule the respawn and announce zero health.
    /// The body stays in the world for replication but no longer stops rays.
    fn kill_player(&mut self, player: PlayerId) -> Result<(), SimError> {
        self.ctx.player_mut(player)?.kill();
        if let Some(body) = self.ctx.world.body_mut(ActorId::Player(player)) {
            body.solid = false;
        }
        self.collaborators.weapons.cancel_reload(player);
        self.ctx
            .deadlines
            .schedule(self.ctx.tick + RESPAWN_DELAY_TICKS, Deadline::Respawn { player });
        let recipients = self.ctx.recipients();
        self.broadcast_health(player, &recipients)
    }

    fn broadcast_health(
        &mut self,
        player: PlayerId,
        recipients: &[PlayerId],
    ) -> Result<(), SimError> {
        let health = self.ctx.player(player)?.health;
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            recipients,
            Channel::Reliable,
            &ServerMsg::PlayerHealth {
                player_id: player,
                health,
            },
            None,
        );
        Ok(())
    }

    /// Report inventory changes to their owner
    fn send_slot_updates(
        &mut self,
        player: PlayerId,
        updates: Vec<SlotUpdate>,
    ) -> Result<(), SimError> {
        for update in updates {
            let msg = ServerMsg::UpdateInventorySlot {
                slot_id: update.slot_id,
                item_id: update.item_id,
                amount: update.amount,
            };
            self.outbox.send(player, Channel::Reliable, &msg)?;
        }
        Ok(())
    }

    fn play_shot_audio(&mut self, player: PlayerId, weapon: &WeaponStats) {
        let Some(clip_name) = self.collaborators.assets.clip_name(weapon.name) else {
            debug!(weapon = weapon.name, "No clip for weapon");
            return;
        };
        let Some(location) = self
            .ctx
            .world
            .transform(ActorId::Player(player))
            .map(|t| t.position)
        else {
            return;
        };

        let recipients = self.ctx.recipients();
        self.broadcaster.broadcast(
            self.outbox.as_ref(),
            &recipients,
            Channel::Unreliable,
            &ServerMsg::PlayAudioClip {
                clip_name,
                volume: SHOT_VOLUME,
                location,
                min_distance: SHOT_MIN_DISTANCE,
                max_distance: SHOT_MAX_DISTANCE,
            },
            None,
        );
    }

    /// Apply drained inputs in order, splitting the tick's delta evenly among them
    fn apply_movement(
        &mut self,
        player: PlayerId,
        inputs: &[InputCommand],
    ) -> Result<Option<PendingAck>, SimError> {
        let actor = ActorId::Player(player);
        let state = self
            .ctx
            .players
            .get_mut(&player)
            .ok_or(SimError::UnknownPlayer(player))?;
        let last_frame_id = inputs.last().map(|cmd| cmd.frame_id);

        let Some(mut transform) = self.ctx.world.transform(actor) else {
            // Joined but not spawned: nothing to move or acknowledge
            state.last_frame_id = last_frame_id;
            return Ok(None);
        };

        if state.alive {
            let dt = tick_delta() / inputs.len() as f32;
            for cmd in inputs {
                transform = state.apply_input(transform, cmd, dt, &self.movement);
            }
            self.ctx.world.set_transform(actor, transform);
        } else {
            state.last_frame_id = last_frame_id;
        }

        Ok(Some(PendingAck {
            player,
            state: AuthoritativeState {
                frame_id: last_frame_id.unwrap_or_default(),
                tick: self.ctx.tick,
                position: transform.position,
                rotation: transform.rotation,
                velocity: state.velocity,
            },
            look: state.look,
            movement: state.movement,
        }))
    }
}

fn log_player_error(player: PlayerId, error: &SimError) {
    match error {
        SimError::UnknownPlayer(_) | SimError::DisconnectedDuringProcessing(_) => {
            debug!(player_id = %player, error = %error, "Skipping player this tick")
        }
        SimError::Send(_) => warn!(player_id = %player, error = %error, "Player processing failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::outbox::RecordingOutbox;
    use crate::net::protocol::ClientMsg;

    fn scheduler() -> (TickScheduler, Arc<InputIngress>, Arc<RecordingOutbox>) {
        let ingress = Arc::new(InputIngress::new());
        let outbox = Arc::new(RecordingOutbox::new());
        let scheduler = TickScheduler::builder()
            .outbox(outbox.clone())
            .ingress(ingress.clone())
            .seed(3)
            .build()
            .unwrap();
        (scheduler, ingress, outbox)
    }

    fn join(ingress: &InputIngress, id: PlayerId) {
        ingress.register_player(id);
        ingress.submit_msg(id, ClientMsg::JoinWelcomeAck { username: format!("p{}", id) });
        ingress.submit_msg(id, ClientMsg::SpawnRequest);
    }

    #[test]
    fn build_requires_outbox_and_ingress() {
        let err = TickScheduler::builder()
            .ingress(Arc::new(InputIngress::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::MissingCollaborator("outbox")));

        let err = TickScheduler::builder()
            .outbox(Arc::new(RecordingOutbox::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::MissingCollaborator("input ingress")));
    }

    #[test]
    fn join_and_spawn_announce_to_everyone() {
        let (mut scheduler, ingress, outbox) = scheduler();
        join(&ingress, PlayerId(1));
        scheduler.tick();
        outbox.take();

        join(&ingress, PlayerId(2));
        let report = scheduler.tick();
        assert_eq!(report.errors, 0);
        assert_eq!(report.players, 2);

        let sent = outbox.take();
        let connected_to_new = sent.iter().any(|m| {
            m.to == PlayerId(2)
                && m.msg
                    == ServerMsg::PlayerConnected {
                        player_id: PlayerId(1),
                        username: "p1".into(),
                    }
        });
        assert!(connected_to_new);
        let spawn_of_old_to_new = sent.iter().any(|m| {
            m.to == PlayerId(2)
                && matches!(m.msg, ServerMsg::SpawnPlayer { player_id: PlayerId(1), .. })
        });
        assert!(spawn_of_old_to_new);
        let spawn_of_new_to_old = sent.iter().any(|m| {
            m.to == PlayerId(1)
                && matches!(m.msg, ServerMsg::SpawnPlayer { player_id: PlayerId(2), .. })
        });
        assert!(spawn_of_new_to_old);
    }

    #[test]
    fn kill_self_schedules_respawn() {
        let (mut scheduler, ingress, outbox) = scheduler();
        let id = PlayerId(1);
        join(&ingress, id);
        scheduler.tick();

        ingress.submit_msg(id, ClientMsg::KillSelf);
        scheduler.tick();
        assert!(!scheduler.context().players[&id].alive);
        assert!(outbox.take().iter().any(|m| m.msg
            == ServerMsg::PlayerHealth {
                player_id: id,
                health: 0.0
            }));

        for _ in 0..RESPAWN_DELAY_TICKS {
            scheduler.tick();
        }
        assert!(scheduler.context().players[&id].alive);
        assert!(outbox.take().iter().any(|m| {
            matches!(m.msg, ServerMsg::PlayerRespawned { player_id, .. } if player_id == id)
        }));
    }

    #[test]
    fn reload_completes_on_deadline() {
        let (mut scheduler, ingress, _outbox) = scheduler();
        let id = PlayerId(1);
        join(&ingress, id);
        scheduler.tick();

        ingress.submit_msg(
            id,
            ClientMsg::WeaponShoot(ShotRequest {
                tick: 0,
                subtick: 0.0,
                direction: Vec3::Y,
            }),
        );
        scheduler.tick();
        assert!(scheduler.context().deadlines.is_empty());

        // Actions run before shots, so the reload goes in the following tick
        ingress.submit_msg(id, ClientMsg::WeaponReload);
        scheduler.tick();
        assert_eq!(scheduler.context().deadlines.len(), 1);

        for _ in 0..WeaponStats::rifle().reload_ticks {
            scheduler.tick();
        }
        assert!(scheduler.context().deadlines.is_empty());
    }

    #[test]
    fn ready_forces_full_replication() {
        let (mut scheduler, ingress, _outbox) = scheduler();
        join(&ingress, PlayerId(1));
        join(&ingress, PlayerId(2));
        scheduler.tick();
        // Nothing moves, so an ordinary tick replicates nothing
        assert_eq!(scheduler.tick().replicated, 0);

        ingress.submit_msg(PlayerId(1), ClientMsg::Ready);
        assert_eq!(scheduler.tick().replicated, 2);
    }

    #[test]
    fn actions_before_join_are_skipped() {
        let (mut scheduler, ingress, _outbox) = scheduler();
        let id = PlayerId(5);
        ingress.register_player(id);
        ingress.submit_msg(id, ClientMsg::SpawnRequest);
        let report = scheduler.tick();
        assert_eq!(report.errors, 1);
        assert!(scheduler.context().players.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_loop_skips_missed_ticks() {
        let counter = Arc::new(AtomicU32::new(0));
        let scheduler = TickScheduler::builder()
            .outbox(Arc::new(RecordingOutbox::new()))
            .ingress(Arc::new(InputIngress::new()))
            .tick_counter(counter.clone())
            .build()
            .unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.run(async move {
            let _ = stop_rx.await;
        }));
        let period = tick_period();

        tokio::time::sleep(period / 4).await;
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        // Ten periods elapse while the loop is not polled; it catches up with one tick
        tokio::time::advance(period * 10).await;
        tokio::time::sleep(period / 4).await;
        assert_eq!(counter.load(Ordering::Relaxed), 2);

        tokio::time::sleep(period).await;
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
