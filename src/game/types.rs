//! Core simulation data model: ids, ticks, transforms, input and hit-scan records

use std::fmt;

use glam::{Quat, Vec3};

/// Global simulation step counter
pub type Tick = u32;

/// Network-assigned player identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a simulated actor, tagged by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActorId {
    /// The body controlled by a connected player
    Player(PlayerId),
    /// A free rigid body owned by the server
    Prop(u32),
}

impl ActorId {
    pub fn player(self) -> Option<PlayerId> {
        match self {
            ActorId::Player(id) => Some(id),
            ActorId::Prop(_) => None,
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorId::Player(id) => write!(f, "player:{}", id),
            ActorId::Prop(id) => write!(f, "prop:{}", id),
        }
    }
}

/// Position and rotation of an actor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A transform recorded for one actor at one tick; never mutated after recording
pub type ActorSnapshot = Transform;

/// Movement and action buttons held in an input frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons(pub u16);

impl Buttons {
    pub const FORWARD: Self = Self(1 << 0);
    pub const BACKWARD: Self = Self(1 << 1);
    pub const LEFT: Self = Self(1 << 2);
    pub const RIGHT: Self = Self(1 << 3);
    pub const JUMP: Self = Self(1 << 4);
    pub const SPRINT: Self = Self(1 << 5);
    pub const CROUCH: Self = Self(1 << 6);
    pub const FIRE: Self = Self(1 << 7);
    pub const AIM: Self = Self(1 << 8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One client input frame, consumed exactly once by the simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    /// Client simulation frame id, echoed back in `input-processed`
    pub frame_id: u32,
    pub buttons: Buttons,
    /// Look yaw in radians, around +Y
    pub yaw: f32,
    /// Look pitch in radians, positive looks up
    pub pitch: f32,
    /// Fraction between the client's interpolation ticks when the frame was sampled
    pub subtick: Option<f32>,
}

impl InputCommand {
    pub fn look_rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(-self.pitch)
    }

    pub fn body_rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw)
    }
}

/// A shoot request as decoded off the wire, before weapon clearance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRequest {
    /// Server tick the client was displaying when it fired
    pub tick: Tick,
    pub subtick: f32,
    pub direction: Vec3,
}

/// A cleared shot awaiting lag-compensated resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitScanEvent {
    pub player: PlayerId,
    pub tick: Tick,
    pub subtick: f32,
    pub direction: Vec3,
}

impl HitScanEvent {
    pub fn new(player: PlayerId, request: ShotRequest) -> Self {
        Self {
            player,
            tick: request.tick,
            subtick: request.subtick.clamp(0.0, 1.0),
            direction: request.direction.normalize_or_zero(),
        }
    }
}

/// Non-movement requests routed through ingress in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    JoinAck { username: String },
    SpawnRequest,
    Ready,
    WeaponSwitch { index: i32 },
    Reload,
    CancelReload,
    TransferSlot { from: String, to: String, mode: i32 },
    ReduceItem { item_id: String, amount: i32 },
    KillSelf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_scan_event_sanitizes_request() {
        let event = HitScanEvent::new(
            PlayerId(3),
            ShotRequest {
                tick: 9,
                subtick: 1.7,
                direction: Vec3::new(0.0, 0.0, 4.0),
            },
        );
        assert_eq!(event.subtick, 1.0);
        assert!((event.direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn buttons_combine() {
        let held = Buttons::FORWARD.with(Buttons::SPRINT);
        assert!(held.contains(Buttons::FORWARD));
        assert!(held.contains(Buttons::SPRINT));
        assert!(!held.contains(Buttons::JUMP));
    }
}
