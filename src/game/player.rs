//! Authoritative player state and movement

use glam::{Quat, Vec3};

use super::combat::MAX_HEALTH;
use super::types::{Buttons, InputCommand, PlayerId, Transform};
use super::world::{Body, GRAVITY};

/// Eye height above the feet, origin of hit-scan rays
pub const EYE_HEIGHT: f32 = 1.6;
/// Player hit sphere radius
pub const HIT_RADIUS: f32 = 0.5;
/// Hit sphere centre above the feet
pub const HIT_CENTER_HEIGHT: f32 = 1.0;

/// Ground movement tuning
#[derive(Debug, Clone, Copy)]
pub struct MovementStats {
    /// Top walking speed (units/s)
    pub walk_speed: f32,
    pub sprint_multiplier: f32,
    pub crouch_multiplier: f32,
    /// Speed gained per second while a direction is held
    pub acceleration: f32,
    /// Speed lost per second with no direction held
    pub friction: f32,
    /// Initial upward speed of a jump
    pub jump_speed: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            sprint_multiplier: 1.6,
            crouch_multiplier: 0.5,
            acceleration: 40.0,
            friction: 30.0,
            jump_speed: 7.0,
        }
    }
}

/// Player state in the simulation (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub username: String,

    /// Has a body in the world
    pub spawned: bool,
    pub ready: bool,

    // Movement
    pub velocity: Vec3,
    pub on_ground: bool,
    pub look: Quat,
    /// Local-space wish direction from the last applied input
    pub movement: Vec3,

    // Combat
    pub health: f32,
    pub alive: bool,

    // Input tracking
    pub last_frame_id: Option<u32>,

    // Stats
    pub kills: u32,
    pub deaths: u32,
    pub shots_fired: u32,
    pub shots_hit: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, username: String) -> Self {
        Self {
            id,
            username,
            spawned: false,
            ready: false,
            velocity: Vec3::ZERO,
            on_ground: true,
            look: Quat::IDENTITY,
            movement: Vec3::ZERO,
            health: MAX_HEALTH,
            alive: false,
            last_frame_id: None,
            kills: 0,
            deaths: 0,
            shots_fired: 0,
            shots_hit: 0,
        }
    }

    /// Hit volume for a body placed at `transform`
    pub fn body(transform: Transform) -> Body {
        Body::new(transform, HIT_RADIUS, HIT_CENTER_HEIGHT)
    }

    /// Reset to full health at a spawn point
    pub fn revive(&mut self) {
        self.spawned = true;
        self.alive = true;
        self.health = MAX_HEALTH;
        self.velocity = Vec3::ZERO;
        self.on_ground = true;
        self.movement = Vec3::ZERO;
    }

    pub fn kill(&mut self) {
        self.alive = false;
        self.health = 0.0;
        self.deaths += 1;
        self.velocity = Vec3::ZERO;
        self.movement = Vec3::ZERO;
    }

    /// Apply one input frame over `dt` seconds starting from `transform`.
    /// Returns the new body transform.
    pub fn apply_input(
        &mut self,
        transform: Transform,
        cmd: &InputCommand,
        dt: f32,
        stats: &MovementStats,
    ) -> Transform {
        self.look = cmd.look_rotation();
        self.last_frame_id = Some(cmd.frame_id);
        let rotation = cmd.body_rotation();

        let wish = wish_direction(cmd.buttons);
        self.movement = wish;

        let mut speed = stats.walk_speed;
        if cmd.buttons.contains(Buttons::SPRINT) {
            speed *= stats.sprint_multiplier;
        } else if cmd.buttons.contains(Buttons::CROUCH) {
            speed *= stats.crouch_multiplier;
        }

        // Horizontal velocity approaches the wish velocity at a bounded rate
        let target = rotation * wish * speed;
        let horizontal = Vec3::new(self.velocity.x, 0.0, self.velocity.z);
        let rate = if wish == Vec3::ZERO {
            stats.friction
        } else {
            stats.acceleration
        };
        let horizontal = move_towards(horizontal, target, rate * dt);

        let mut vertical = self.velocity.y;
        if self.on_ground && cmd.buttons.contains(Buttons::JUMP) {
            vertical = stats.jump_speed;
            self.on_ground = false;
        }
        if !self.on_ground {
            vertical -= GRAVITY * dt;
        }

        self.velocity = Vec3::new(horizontal.x, vertical, horizontal.z);
        let mut position = transform.position + self.velocity * dt;
        if position.y <= 0.0 {
            position.y = 0.0;
            self.velocity.y = 0.0;
            self.on_ground = true;
        }

        Transform::new(position, rotation)
    }
}

/// Local-space unit direction from held buttons (+Z forward, +X right)
fn wish_direction(buttons: Buttons) -> Vec3 {
    let axis = |pos: Buttons, neg: Buttons| {
        (buttons.contains(pos) as i8 - buttons.contains(neg) as i8) as f32
    };
    Vec3::new(
        axis(Buttons::RIGHT, Buttons::LEFT),
        0.0,
        axis(Buttons::FORWARD, Buttons::BACKWARD),
    )
    .normalize_or_zero()
}

fn move_towards(current: Vec3, target: Vec3, max_delta: f32) -> Vec3 {
    let delta = target - current;
    let distance = delta.length();
    if distance <= max_delta || distance < f32::EPSILON {
        target
    } else {
        current + delta / distance * max_delta
    }
}
