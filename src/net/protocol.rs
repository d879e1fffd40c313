//! Wire protocol message definitions
//! These are the typed frames for client-server communication

use bytes::{BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};

use crate::game::types::{Buttons, InputCommand, PlayerAction, PlayerId, ShotRequest, Tick};

use super::codec::{encode_frame, Frame, WireReader, WireWrite};

/// Bumped whenever a payload layout changes
pub const PROTOCOL_VERSION: u16 = 1;

/// Protocol decode/encode errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid frame length {0}")]
    InvalidLength(i32),

    #[error("Unknown opcode {0}")]
    UnknownOpcode(i32),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("String of {0} bytes exceeds wire limit")]
    StringTooLong(usize),

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Non-finite float in payload")]
    NonFinite,

    #[error("Unknown hit type {0}")]
    UnknownHitType(u8),
}

/// Client to server opcodes
pub mod client_op {
    pub const JOIN_WELCOME_ACK: i32 = 1;
    pub const PING: i32 = 2;
    pub const SPAWN_REQUEST: i32 = 3;
    pub const READY: i32 = 4;
    pub const INPUT_STATE: i32 = 5;
    pub const WEAPON_SHOOT: i32 = 6;
    pub const WEAPON_SWITCH: i32 = 7;
    pub const WEAPON_RELOAD: i32 = 8;
    pub const WEAPON_CANCEL_RELOAD: i32 = 9;
    pub const TRANSFER_SLOT: i32 = 10;
    pub const REDUCE_ITEM: i32 = 11;
    pub const KILL_SELF: i32 = 12;
}

/// Server to client opcodes
pub mod server_op {
    pub const WELCOME: i32 = 100;
    pub const PLAYER_CONNECTED: i32 = 101;
    pub const PING: i32 = 102;
    pub const SPAWN_PLAYER: i32 = 103;
    pub const PLAYER_POSITION: i32 = 104;
    pub const PLAYER_ROTATION: i32 = 105;
    pub const PLAYER_MOVEMENT_VECTOR: i32 = 106;
    pub const PLAYER_DISCONNECTED: i32 = 107;
    pub const PLAYER_HEALTH: i32 = 108;
    pub const PLAYER_RESPAWNED: i32 = 109;
    pub const UPDATE_INVENTORY_SLOT: i32 = 110;
    pub const SPAWN_HIT_OBJECT: i32 = 111;
    pub const PLAY_AUDIO_CLIP: i32 = 112;
    pub const INPUT_PROCESSED: i32 = 113;
    pub const ACTOR_TRANSFORM: i32 = 114;
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Reply to welcome carrying the chosen display name
    JoinWelcomeAck { username: String },
    /// Latency probe, echoed back verbatim
    Ping { stamp: u64 },
    SpawnRequest,
    Ready,
    /// Movement and look for one client frame
    InputState(InputCommand),
    /// Hit-scan fire claimed against a past server tick
    WeaponShoot(ShotRequest),
    WeaponSwitch { index: i32 },
    WeaponReload,
    WeaponCancelReload,
    TransferSlot { from: String, to: String, mode: i32 },
    ReduceItem { item_id: String, amount: i32 },
    KillSelf,
}

/// What a hit-scan ray struck, for impact effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitType {
    Player = 0,
    World = 1,
    Prop = 2,
}

impl HitType {
    fn from_u8(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            0 => Ok(Self::Player),
            1 => Ok(Self::World),
            2 => Ok(Self::Prop),
            other => Err(ProtocolError::UnknownHitType(other)),
        }
    }
}

/// Authoritative per-player state acknowledging processed input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthoritativeState {
    pub frame_id: u32,
    pub tick: Tick,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    Welcome {
        player_id: PlayerId,
        protocol_version: u16,
        tick: Tick,
        tick_rate: u32,
        udp_token: u64,
    },
    PlayerConnected {
        player_id: PlayerId,
        username: String,
    },
    Ping {
        stamp: u64,
    },
    SpawnPlayer {
        player_id: PlayerId,
        position: Vec3,
        rotation: Quat,
    },
    PlayerPosition {
        player_id: PlayerId,
        position: Vec3,
    },
    PlayerRotation {
        player_id: PlayerId,
        rotation: Quat,
    },
    /// Look orientation and derived movement vector for remote interpolation
    PlayerMovementVector {
        player_id: PlayerId,
        orientation: Quat,
        movement: Vec3,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    PlayerHealth {
        player_id: PlayerId,
        health: f32,
    },
    PlayerRespawned {
        player_id: PlayerId,
        position: Vec3,
        rotation: Quat,
    },
    UpdateInventorySlot {
        slot_id: String,
        item_id: String,
        amount: i32,
    },
    SpawnHitObject {
        hit_type: HitType,
        point: Vec3,
        normal: Vec3,
    },
    PlayAudioClip {
        clip_name: String,
        volume: f32,
        location: Vec3,
        min_distance: f32,
        max_distance: f32,
    },
    InputProcessed(AuthoritativeState),
    /// Non-player actor transform
    ActorTransform {
        actor_id: u32,
        position: Vec3,
        rotation: Quat,
    },
}

impl ClientMsg {
    /// Decode a client frame
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(frame.payload.clone());
        let msg = match frame.opcode {
            client_op::JOIN_WELCOME_ACK => ClientMsg::JoinWelcomeAck {
                username: r.string()?,
            },
            client_op::PING => ClientMsg::Ping { stamp: r.u64()? },
            client_op::SPAWN_REQUEST => ClientMsg::SpawnRequest,
            client_op::READY => ClientMsg::Ready,
            client_op::INPUT_STATE => {
                let frame_id = r.u32()?;
                let buttons = Buttons(r.u16()?);
                let yaw = r.f32()?;
                let pitch = r.f32()?;
                let subtick = if r.bool()? { Some(r.f32()?) } else { None };
                ClientMsg::InputState(InputCommand {
                    frame_id,
                    buttons,
                    yaw,
                    pitch,
                    subtick,
                })
            }
            client_op::WEAPON_SHOOT => ClientMsg::WeaponShoot(ShotRequest {
                tick: r.u32()?,
                subtick: r.f32()?,
                direction: r.vec3()?,
            }),
            client_op::WEAPON_SWITCH => ClientMsg::WeaponSwitch { index: r.i32()? },
            client_op::WEAPON_RELOAD => ClientMsg::WeaponReload,
            client_op::WEAPON_CANCEL_RELOAD => ClientMsg::WeaponCancelReload,
            client_op::TRANSFER_SLOT => ClientMsg::TransferSlot {
                from: r.string()?,
                to: r.string()?,
                mode: r.i32()?,
            },
            client_op::REDUCE_ITEM => ClientMsg::ReduceItem {
                item_id: r.string()?,
                amount: r.i32()?,
            },
            client_op::KILL_SELF => ClientMsg::KillSelf,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        r.finish()?;
        Ok(msg)
    }

    /// Encode into a complete frame (used by clients and tests)
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut p = BytesMut::new();
        let opcode = match self {
            ClientMsg::JoinWelcomeAck { username } => {
                p.put_str(username)?;
                client_op::JOIN_WELCOME_ACK
            }
            ClientMsg::Ping { stamp } => {
                p.put_u64_le(*stamp);
                client_op::PING
            }
            ClientMsg::SpawnRequest => client_op::SPAWN_REQUEST,
            ClientMsg::Ready => client_op::READY,
            ClientMsg::InputState(cmd) => {
                p.put_u32_le(cmd.frame_id);
                p.put_u16_le(cmd.buttons.0);
                p.put_f32_le(cmd.yaw);
                p.put_f32_le(cmd.pitch);
                p.put_bool(cmd.subtick.is_some());
                if let Some(subtick) = cmd.subtick {
                    p.put_f32_le(subtick);
                }
                client_op::INPUT_STATE
            }
            ClientMsg::WeaponShoot(shot) => {
                p.put_u32_le(shot.tick);
                p.put_f32_le(shot.subtick);
                p.put_vec3(shot.direction);
                client_op::WEAPON_SHOOT
            }
            ClientMsg::WeaponSwitch { index } => {
                p.put_i32_le(*index);
                client_op::WEAPON_SWITCH
            }
            ClientMsg::WeaponReload => client_op::WEAPON_RELOAD,
            ClientMsg::WeaponCancelReload => client_op::WEAPON_CANCEL_RELOAD,
            ClientMsg::TransferSlot { from, to, mode } => {
                p.put_str(from)?;
                p.put_str(to)?;
                p.put_i32_le(*mode);
                client_op::TRANSFER_SLOT
            }
            ClientMsg::ReduceItem { item_id, amount } => {
                p.put_str(item_id)?;
                p.put_i32_le(*amount);
                client_op::REDUCE_ITEM
            }
            ClientMsg::KillSelf => client_op::KILL_SELF,
        };
        Ok(encode_frame(opcode, &p))
    }

    /// Map control messages onto simulation actions; input, shots and pings return `None`
    pub fn into_action(self) -> Option<PlayerAction> {
        match self {
            ClientMsg::JoinWelcomeAck { username } => Some(PlayerAction::JoinAck { username }),
            ClientMsg::SpawnRequest => Some(PlayerAction::SpawnRequest),
            ClientMsg::Ready => Some(PlayerAction::Ready),
            ClientMsg::WeaponSwitch { index } => Some(PlayerAction::WeaponSwitch { index }),
            ClientMsg::WeaponReload => Some(PlayerAction::Reload),
            ClientMsg::WeaponCancelReload => Some(PlayerAction::CancelReload),
            ClientMsg::TransferSlot { from, to, mode } => {
                Some(PlayerAction::TransferSlot { from, to, mode })
            }
            ClientMsg::ReduceItem { item_id, amount } => {
                Some(PlayerAction::ReduceItem { item_id, amount })
            }
            ClientMsg::KillSelf => Some(PlayerAction::KillSelf),
            ClientMsg::Ping { .. } | ClientMsg::InputState(_) | ClientMsg::WeaponShoot(_) => None,
        }
    }
}

impl ServerMsg {
    pub fn opcode(&self) -> i32 {
        match self {
            ServerMsg::Welcome { .. } => server_op::WELCOME,
            ServerMsg::PlayerConnected { .. } => server_op::PLAYER_CONNECTED,
            ServerMsg::Ping { .. } => server_op::PING,
            ServerMsg::SpawnPlayer { .. } => server_op::SPAWN_PLAYER,
            ServerMsg::PlayerPosition { .. } => server_op::PLAYER_POSITION,
            ServerMsg::PlayerRotation { .. } => server_op::PLAYER_ROTATION,
            ServerMsg::PlayerMovementVector { .. } => server_op::PLAYER_MOVEMENT_VECTOR,
            ServerMsg::PlayerDisconnected { .. } => server_op::PLAYER_DISCONNECTED,
            ServerMsg::PlayerHealth { .. } => server_op::PLAYER_HEALTH,
            ServerMsg::PlayerRespawned { .. } => server_op::PLAYER_RESPAWNED,
            ServerMsg::UpdateInventorySlot { .. } => server_op::UPDATE_INVENTORY_SLOT,
            ServerMsg::SpawnHitObject { .. } => server_op::SPAWN_HIT_OBJECT,
            ServerMsg::PlayAudioClip { .. } => server_op::PLAY_AUDIO_CLIP,
            ServerMsg::InputProcessed(_) => server_op::INPUT_PROCESSED,
            ServerMsg::ActorTransform { .. } => server_op::ACTOR_TRANSFORM,
        }
    }

    /// Encode into a complete frame
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut p = BytesMut::new();
        match self {
            ServerMsg::Welcome {
                player_id,
                protocol_version,
                tick,
                tick_rate,
                udp_token,
            } => {
                p.put_u32_le(player_id.0);
                p.put_u16_le(*protocol_version);
                p.put_u32_le(*tick);
                p.put_u32_le(*tick_rate);
                p.put_u64_le(*udp_token);
            }
            ServerMsg::PlayerConnected {
                player_id,
                username,
            } => {
                p.put_u32_le(player_id.0);
                p.put_str(username)?;
            }
            ServerMsg::Ping { stamp } => p.put_u64_le(*stamp),
            ServerMsg::SpawnPlayer {
                player_id,
                position,
                rotation,
            }
            | ServerMsg::PlayerRespawned {
                player_id,
                position,
                rotation,
            } => {
                p.put_u32_le(player_id.0);
                p.put_vec3(*position);
                p.put_quat(*rotation);
            }
            ServerMsg::PlayerPosition {
                player_id,
                position,
            } => {
                p.put_u32_le(player_id.0);
                p.put_vec3(*position);
            }
            ServerMsg::PlayerRotation {
                player_id,
                rotation,
            } => {
                p.put_u32_le(player_id.0);
                p.put_quat(*rotation);
            }
            ServerMsg::PlayerMovementVector {
                player_id,
                orientation,
                movement,
            } => {
                p.put_u32_le(player_id.0);
                p.put_quat(*orientation);
                p.put_vec3(*movement);
            }
            ServerMsg::PlayerDisconnected { player_id } => p.put_u32_le(player_id.0),
            ServerMsg::PlayerHealth { player_id, health } => {
                p.put_u32_le(player_id.0);
                p.put_f32_le(*health);
            }
            ServerMsg::UpdateInventorySlot {
                slot_id,
                item_id,
                amount,
            } => {
                p.put_str(slot_id)?;
                p.put_str(item_id)?;
                p.put_i32_le(*amount);
            }
            ServerMsg::SpawnHitObject {
                hit_type,
                point,
                normal,
            } => {
                p.put_u8(*hit_type as u8);
                p.put_vec3(*point);
                p.put_vec3(*normal);
            }
            ServerMsg::PlayAudioClip {
                clip_name,
                volume,
                location,
                min_distance,
                max_distance,
            } => {
                p.put_str(clip_name)?;
                p.put_f32_le(*volume);
                p.put_vec3(*location);
                p.put_f32_le(*min_distance);
                p.put_f32_le(*max_distance);
            }
            ServerMsg::InputProcessed(state) => {
                p.put_u32_le(state.frame_id);
                p.put_u32_le(state.tick);
                p.put_vec3(state.position);
                p.put_quat(state.rotation);
                p.put_vec3(state.velocity);
            }
            ServerMsg::ActorTransform {
                actor_id,
                position,
                rotation,
            } => {
                p.put_u32_le(*actor_id);
                p.put_vec3(*position);
                p.put_quat(*rotation);
            }
        }
        Ok(encode_frame(self.opcode(), &p))
    }

    /// Decode a server frame (used by clients and tests)
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(frame.payload.clone());
        let msg = match frame.opcode {
            server_op::WELCOME => ServerMsg::Welcome {
                player_id: PlayerId(r.u32()?),
                protocol_version: r.u16()?,
                tick: r.u32()?,
                tick_rate: r.u32()?,
                udp_token: r.u64()?,
            },
            server_op::PLAYER_CONNECTED => ServerMsg::PlayerConnected {
                player_id: PlayerId(r.u32()?),
                username: r.string()?,
            },
            server_op::PING => ServerMsg::Ping { stamp: r.u64()? },
            server_op::SPAWN_PLAYER => ServerMsg::SpawnPlayer {
                player_id: PlayerId(r.u32()?),
                position: r.vec3()?,
                rotation: r.quat()?,
            },
            server_op::PLAYER_POSITION => ServerMsg::PlayerPosition {
                player_id: PlayerId(r.u32()?),
                position: r.vec3()?,
            },
            server_op::PLAYER_ROTATION => ServerMsg::PlayerRotation {
                player_id: PlayerId(r.u32()?),
                rotation: r.quat()?,
            },
            server_op::PLAYER_MOVEMENT_VECTOR => ServerMsg::PlayerMovementVector {
                player_id: PlayerId(r.u32()?),
                orientation: r.quat()?,
                movement: r.vec3()?,
            },
            server_op::PLAYER_DISCONNECTED => ServerMsg::PlayerDisconnected {
                player_id: PlayerId(r.u32()?),
            },
            server_op::PLAYER_HEALTH => ServerMsg::PlayerHealth {
                player_id: PlayerId(r.u32()?),
                health: r.f32()?,
            },
            server_op::PLAYER_RESPAWNED => ServerMsg::PlayerRespawned {
                player_id: PlayerId(r.u32()?),
                position: r.vec3()?,
                rotation: r.quat()?,
            },
            server_op::UPDATE_INVENTORY_SLOT => ServerMsg::UpdateInventorySlot {
                slot_id: r.string()?,
                item_id: r.string()?,
                amount: r.i32()?,
            },
            server_op::SPAWN_HIT_OBJECT => ServerMsg::SpawnHitObject {
                hit_type: HitType::from_u8(r.u8()?)?,
                point: r.vec3()?,
                normal: r.vec3()?,
            },
            server_op::PLAY_AUDIO_CLIP => ServerMsg::PlayAudioClip {
                clip_name: r.string()?,
                volume: r.f32()?,
                location: r.vec3()?,
                min_distance: r.f32()?,
                max_distance: r.f32()?,
            },
            server_op::INPUT_PROCESSED => ServerMsg::InputProcessed(AuthoritativeState {
                frame_id: r.u32()?,
                tick: r.u32()?,
                position: r.vec3()?,
                rotation: r.quat()?,
                velocity: r.vec3()?,
            }),
            server_op::ACTOR_TRANSFORM => ServerMsg::ActorTransform {
                actor_id: r.u32()?,
                position: r.vec3()?,
                rotation: r.quat()?,
            },
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::parse_frame;

    #[test]
    fn input_state_layout_is_fixed() {
        let msg = ClientMsg::InputState(InputCommand {
            frame_id: 77,
            buttons: Buttons::FORWARD,
            yaw: 0.5,
            pitch: -0.25,
            subtick: None,
        });
        let frame = parse_frame(msg.encode().unwrap()).unwrap();
        assert_eq!(frame.opcode, client_op::INPUT_STATE);
        // frame id + buttons + yaw + pitch + has_subtick
        assert_eq!(frame.payload.len(), 4 + 2 + 4 + 4 + 1);
        assert_eq!(&frame.payload[..4], &77u32.to_le_bytes());
        assert_eq!(ClientMsg::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn weapon_shoot_decodes_claimed_tick() {
        let mut p = BytesMut::new();
        p.put_u32_le(100);
        p.put_f32_le(0.5);
        p.put_vec3(Vec3::X);
        let frame = parse_frame(encode_frame(client_op::WEAPON_SHOOT, &p)).unwrap();
        match ClientMsg::decode(&frame).unwrap() {
            ClientMsg::WeaponShoot(shot) => {
                assert_eq!(shot.tick, 100);
                assert_eq!(shot.subtick, 0.5);
                assert_eq!(shot.direction, Vec3::X);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_client_frames_are_errors() {
        let short = parse_frame(encode_frame(client_op::WEAPON_SWITCH, &[1, 2])).unwrap();
        assert!(matches!(
            ClientMsg::decode(&short),
            Err(ProtocolError::Truncated { .. })
        ));

        let unknown = parse_frame(encode_frame(999, &[])).unwrap();
        assert_eq!(
            ClientMsg::decode(&unknown),
            Err(ProtocolError::UnknownOpcode(999))
        );

        let trailing = parse_frame(encode_frame(client_op::READY, &[0])).unwrap();
        assert_eq!(
            ClientMsg::decode(&trailing),
            Err(ProtocolError::TrailingBytes(1))
        );
    }

    #[test]
    fn input_processed_survives_encoding() {
        let msg = ServerMsg::InputProcessed(AuthoritativeState {
            frame_id: 12,
            tick: 400,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(1.0),
            velocity: Vec3::new(0.0, -1.0, 0.0),
        });
        let frame = parse_frame(msg.encode().unwrap()).unwrap();
        assert_eq!(frame.opcode, server_op::INPUT_PROCESSED);
        assert_eq!(ServerMsg::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn control_messages_become_actions() {
        assert_eq!(
            ClientMsg::WeaponSwitch { index: 2 }.into_action(),
            Some(PlayerAction::WeaponSwitch { index: 2 })
        );
        assert_eq!(ClientMsg::Ping { stamp: 1 }.into_action(), None);
    }
}
