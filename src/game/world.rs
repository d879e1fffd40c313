//! Actor transforms and ray queries
//!
//! The simulation only needs two capabilities from the world: read/write an actor's
//! transform, and cast a ray to get the first hit. `World` is the built-in provider:
//! sphere hit volumes on a flat ground plane at `y = 0`.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};

use crate::util::time::tick_delta;

use super::types::{ActorId, Transform};

/// Read/write access to actor transforms
pub trait ActorTransforms {
    /// Every actor whose transform participates in rewinds
    fn tracked_actors(&self) -> Vec<ActorId>;
    fn transform(&self, id: ActorId) -> Option<Transform>;
    /// Returns false if the actor does not exist
    fn set_transform(&mut self, id: ActorId, transform: Transform) -> bool;
}

/// What a ray struck first
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayTarget {
    Actor(ActorId),
    World,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub target: RayTarget,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// First-hit ray cast capability
pub trait PhysicsQuery {
    /// `ignore` excludes one actor, normally the shooter's own hit volume
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        ignore: Option<ActorId>,
    ) -> Option<RayHit>;
}

/// Gravity applied to airborne bodies (units/s²)
pub const GRAVITY: f32 = 20.0;
/// Per-tick velocity retention for props
const PROP_DAMPING: f32 = 0.98;

/// Physical properties of an actor
#[derive(Debug, Clone)]
pub struct Body {
    pub transform: Transform,
    pub velocity: Vec3,
    /// Hit sphere radius
    pub radius: f32,
    /// Hit sphere centre above the transform origin
    pub center_height: f32,
    /// Cleared for dead players so rays pass through them
    pub solid: bool,
}

impl Body {
    pub fn new(transform: Transform, radius: f32, center_height: f32) -> Self {
        Self {
            transform,
            velocity: Vec3::ZERO,
            radius,
            center_height,
            solid: true,
        }
    }

    pub fn hit_center(&self) -> Vec3 {
        self.transform.position + Vec3::Y * self.center_height
    }
}

/// Built-in world: actor bodies keyed by id, iterated in id order for determinism
#[derive(Debug, Default)]
pub struct World {
    bodies: BTreeMap<ActorId, Body>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ActorId, body: Body) {
        self.bodies.insert(id, body);
    }

    pub fn remove(&mut self, id: ActorId) -> Option<Body> {
        self.bodies.remove(&id)
    }

    pub fn body(&self, id: ActorId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: ActorId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.bodies.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Integrate free props: gravity, damping, rest on the ground plane.
    /// Player bodies are moved by their controllers, not here.
    pub fn step(&mut self) {
        let dt = tick_delta();
        for (id, body) in self.bodies.iter_mut() {
            if !matches!(id, ActorId::Prop(_)) {
                continue;
            }
            body.velocity.y -= GRAVITY * dt;
            body.velocity *= PROP_DAMPING;
            let mut position = body.transform.position + body.velocity * dt;
            if position.y <= 0.0 {
                position.y = 0.0;
                body.velocity.y = 0.0;
            }
            body.transform.position = position;
            // Tumble along the horizontal velocity
            let horizontal = Vec3::new(body.velocity.x, 0.0, body.velocity.z);
            let speed = horizontal.length();
            if speed > 1e-3 && body.radius > 0.0 {
                let axis = Vec3::Y.cross(horizontal / speed);
                let roll = Quat::from_axis_angle(axis, speed * dt / body.radius);
                body.transform.rotation = (roll * body.transform.rotation).normalize();
            }
        }
    }
}

impl ActorTransforms for World {
    fn tracked_actors(&self) -> Vec<ActorId> {
        self.bodies.keys().copied().collect()
    }

    fn transform(&self, id: ActorId) -> Option<Transform> {
        self.bodies.get(&id).map(|b| b.transform)
    }

    fn set_transform(&mut self, id: ActorId, transform: Transform) -> bool {
        match self.bodies.get_mut(&id) {
            Some(body) => {
                body.transform = transform;
                true
            }
            None => false,
        }
    }
}

impl PhysicsQuery for World {
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        ignore: Option<ActorId>,
    ) -> Option<RayHit> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO || max_distance <= 0.0 {
            return None;
        }

        let mut best: Option<RayHit> = ray_ground(origin, dir, max_distance);

        for (id, body) in &self.bodies {
            if Some(*id) == ignore || !body.solid {
                continue;
            }
            let center = body.hit_center();
            if let Some(t) = ray_sphere(origin, dir, center, body.radius) {
                if t <= max_distance && best.map_or(true, |b| t < b.distance) {
                    let point = origin + dir * t;
                    best = Some(RayHit {
                        target: RayTarget::Actor(*id),
                        point,
                        normal: (point - center).normalize_or_zero(),
                        distance: t,
                    });
                }
            }
        }

        best
    }
}

/// Entry distance along a normalized ray, or `None` if the sphere is missed or behind
fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sqrt = disc.sqrt();
    let near = -b - sqrt;
    if near >= 0.0 {
        return Some(near);
    }
    // Origin inside the sphere counts as an immediate hit
    let far = -b + sqrt;
    (far >= 0.0).then_some(0.0)
}

fn ray_ground(origin: Vec3, dir: Vec3, max_distance: f32) -> Option<RayHit> {
    if dir.y >= 0.0 || origin.y < 0.0 {
        return None;
    }
    let t = -origin.y / dir.y;
    (t <= max_distance).then(|| RayHit {
        target: RayTarget::World,
        point: origin + dir * t,
        normal: Vec3::Y,
        distance: t,
    })
}
