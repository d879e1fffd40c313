//! Lag-compensated hit resolution
//!
//! A hit-scan event claims the tick (and sub-tick fraction) the shooter was looking at.
//! Resolution moves every tracked actor to where it was at that instant, runs the hit
//! test once, then puts every actor back. Restoration is tied to a drop guard so it
//! also happens if the hit test panics.

use glam::Vec3;
use tracing::debug;

use crate::util::time::TICKS_PER_SECOND;

use super::history::ActorHistoryStore;
use super::types::{ActorId, HitScanEvent, Tick, Transform};
use super::world::{ActorTransforms, PhysicsQuery, RayHit};

/// Oldest claim honored, relative to the current tick. Older claims are clamped.
pub const MAX_REWIND_TICKS: Tick = TICKS_PER_SECOND;

/// Clamp a client-claimed tick into `[current - MAX_REWIND_TICKS, current]`
pub fn clamp_claimed_tick(claimed: Tick, current: Tick) -> Tick {
    claimed
        .min(current)
        .max(current.saturating_sub(MAX_REWIND_TICKS))
}

/// Historical transform of one actor at `tick + subtick`.
///
/// Position is interpolated from `tick - 1` towards `tick`; rotation is taken from
/// `tick - 1` unchanged. Without a `tick - 1` entry the nearest exact snapshot is used.
/// Returns `None` when the actor has no history at all.
pub fn rewound_transform(
    history: &ActorHistoryStore,
    actor: ActorId,
    tick: Tick,
    subtick: f32,
) -> Option<Transform> {
    let history = history.history(actor)?;
    let to = history
        .get(tick)
        .or_else(|| history.nearest(tick).map(|(_, snapshot)| snapshot))?;

    match tick.checked_sub(1).and_then(|prev| history.exact(prev)) {
        Some(from) => Some(Transform {
            position: from.position.lerp(to.position, subtick.clamp(0.0, 1.0)),
            rotation: from.rotation,
        }),
        None => Some(to),
    }
}

/// Puts saved transforms back when dropped
struct RestoreGuard<'a, W: ActorTransforms> {
    world: &'a mut W,
    saved: &'a mut Vec<(ActorId, Transform)>,
}

impl<W: ActorTransforms> Drop for RestoreGuard<'_, W> {
    fn drop(&mut self) {
        for (id, transform) in self.saved.drain(..) {
            self.world.set_transform(id, transform);
        }
    }
}

/// Rewind/replay engine. Holds the saved-state slots reused by every resolution;
/// `resolve` takes `&mut self`, so resolutions cannot overlap or nest.
#[derive(Debug, Default)]
pub struct RewindEngine {
    saved: Vec<(ActorId, Transform)>,
}

impl RewindEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one hit-scan event against the world as it was at the claimed instant.
    ///
    /// `hit_test` runs exactly once, with the world rewound, and receives the event with
    /// its tick clamped to the honored window. Every actor's transform is identical
    /// before and after this call.
    pub fn resolve<W, F, R>(
        &mut self,
        world: &mut W,
        history: &ActorHistoryStore,
        event: &HitScanEvent,
        current_tick: Tick,
        hit_test: F,
    ) -> R
    where
        W: ActorTransforms,
        F: FnOnce(&W, &HitScanEvent) -> R,
    {
        let effective = HitScanEvent {
            tick: clamp_claimed_tick(event.tick, current_tick),
            ..*event
        };
        if effective.tick != event.tick {
            debug!(
                player_id = %event.player,
                claimed = event.tick,
                effective = effective.tick,
                "Clamped hit-scan claim"
            );
        }

        self.saved.clear();
        for id in world.tracked_actors() {
            if let Some(transform) = world.transform(id) {
                self.saved.push((id, transform));
            }
        }

        let guard = RestoreGuard {
            world,
            saved: &mut self.saved,
        };

        let mut rewound = 0usize;
        for &(id, _) in guard.saved.iter() {
            match rewound_transform(history, id, effective.tick, effective.subtick) {
                Some(past) => {
                    guard.world.set_transform(id, past);
                    rewound += 1;
                }
                None => {
                    debug!(actor = %id, tick = effective.tick, "No history, actor left in place")
                }
            }
        }
        debug!(
            player_id = %event.player,
            tick = effective.tick,
            subtick = effective.subtick,
            actors = rewound,
            "World rewound"
        );

        let result = hit_test(&*guard.world, &effective);
        drop(guard);
        result
    }
}

/// Standard hit test: cast from the shooter's rewound eye position along the event's
/// direction, ignoring the shooter's own hit volume
pub fn cast_from_shooter<W>(
    world: &W,
    event: &HitScanEvent,
    eye_height: f32,
    max_distance: f32,
) -> Option<RayHit>
where
    W: ActorTransforms + PhysicsQuery,
{
    let shooter = ActorId::Player(event.player);
    let origin = world.transform(shooter)?.position + Vec3::Y * eye_height;
    world.cast(origin, event.direction, max_distance, Some(shooter))
}
