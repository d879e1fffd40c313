//! Combat system - weapon clearance, damage

use std::collections::HashMap;

use tracing::debug;

use crate::util::time::secs_to_ticks;

use super::types::{PlayerId, Tick};

/// Starting and maximum health
pub const MAX_HEALTH: f32 = 100.0;

/// Weapon stats per loadout slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    /// Asset key for the gunshot clip
    pub name: &'static str,
    /// Damage per hit
    pub damage: f32,
    /// Ticks between shots
    pub fire_interval: Tick,
    /// Rounds per magazine
    pub magazine: u32,
    /// Ticks to reload
    pub reload_ticks: Tick,
    /// Hit-scan range
    pub range: f32,
}

impl WeaponStats {
    pub fn rifle() -> Self {
        Self {
            name: "rifle",
            damage: 25.0,
            fire_interval: secs_to_ticks(0.1),
            magazine: 30,
            reload_ticks: secs_to_ticks(2.0),
            range: 300.0,
        }
    }

    pub fn pistol() -> Self {
        Self {
            name: "pistol",
            damage: 20.0,
            fire_interval: secs_to_ticks(0.25),
            magazine: 12,
            reload_ticks: secs_to_ticks(1.2),
            range: 120.0,
        }
    }

    pub fn marksman() -> Self {
        Self {
            name: "marksman",
            damage: 75.0,
            fire_interval: secs_to_ticks(1.0),
            magazine: 5,
            reload_ticks: secs_to_ticks(3.0),
            range: 800.0,
        }
    }

    /// Default loadout, indexed by weapon-switch slot
    pub fn loadout() -> Vec<Self> {
        vec![Self::rifle(), Self::pistol(), Self::marksman()]
    }
}

/// Outcome of asking to fire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireClearance {
    Cleared(WeaponStats),
    Cooldown,
    Empty,
    Reloading,
    /// No loadout for this player
    Unarmed,
}

/// Weapon/ammo state provider that gates shoot events
pub trait WeaponGate: Send {
    /// Give the player a fresh loadout (spawn and respawn)
    fn equip(&mut self, player: PlayerId);
    fn try_fire(&mut self, player: PlayerId, tick: Tick) -> FireClearance;
    /// Returns false for an invalid slot
    fn switch(&mut self, player: PlayerId, index: i32) -> bool;
    /// Start reloading the active weapon; returns the due tick and a token
    fn begin_reload(&mut self, player: PlayerId, tick: Tick) -> Option<(Tick, u32)>;
    /// Complete the reload identified by `token`; stale tokens are ignored
    fn finish_reload(&mut self, player: PlayerId, token: u32) -> bool;
    fn cancel_reload(&mut self, player: PlayerId) -> bool;
    fn forget(&mut self, player: PlayerId);
}

#[derive(Debug, Clone)]
struct WeaponState {
    stats: WeaponStats,
    ammo: u32,
    next_fire_tick: Tick,
}

#[derive(Debug, Clone)]
struct Loadout {
    weapons: Vec<WeaponState>,
    active: usize,
    reload: Option<u32>,
    next_token: u32,
}

impl Loadout {
    fn new(stats: &[WeaponStats]) -> Self {
        Self {
            weapons: stats
                .iter()
                .map(|s| WeaponState {
                    stats: *s,
                    ammo: s.magazine,
                    next_fire_tick: 0,
                })
                .collect(),
            active: 0,
            reload: None,
            next_token: 0,
        }
    }

    fn active_mut(&mut self) -> Option<&mut WeaponState> {
        self.weapons.get_mut(self.active)
    }
}

/// Built-in weapon provider: per-player magazines, fire intervals and reloads
#[derive(Debug)]
pub struct Arsenal {
    stats: Vec<WeaponStats>,
    loadouts: HashMap<PlayerId, Loadout>,
}

impl Arsenal {
    pub fn new(stats: Vec<WeaponStats>) -> Self {
        Self {
            stats,
            loadouts: HashMap::new(),
        }
    }

    pub fn ammo(&self, player: PlayerId) -> Option<u32> {
        let loadout = self.loadouts.get(&player)?;
        loadout.weapons.get(loadout.active).map(|w| w.ammo)
    }
}

impl Default for Arsenal {
    fn default() -> Self {
        Self::new(WeaponStats::loadout())
    }
}

impl WeaponGate for Arsenal {
    fn equip(&mut self, player: PlayerId) {
        self.loadouts.insert(player, Loadout::new(&self.stats));
    }

    fn try_fire(&mut self, player: PlayerId, tick: Tick) -> FireClearance {
        let Some(loadout) = self.loadouts.get_mut(&player) else {
            return FireClearance::Unarmed;
        };
        if loadout.reload.is_some() {
            return FireClearance::Reloading;
        }
        let Some(weapon) = loadout.active_mut() else {
            return FireClearance::Unarmed;
        };
        if tick < weapon.next_fire_tick {
            return FireClearance::Cooldown;
        }
        if weapon.ammo == 0 {
            return FireClearance::Empty;
        }
        weapon.ammo -= 1;
        weapon.next_fire_tick = tick + weapon.stats.fire_interval;
        FireClearance::Cleared(weapon.stats)
    }

    fn switch(&mut self, player: PlayerId, index: i32) -> bool {
        let Some(loadout) = self.loadouts.get_mut(&player) else {
            return false;
        };
        match usize::try_from(index) {
            Ok(i) if i < loadout.weapons.len() => {
                loadout.active = i;
                // Switching abandons an in-progress reload
                loadout.reload = None;
                true
            }
            _ => false,
        }
    }

    fn begin_reload(&mut self, player: PlayerId, tick: Tick) -> Option<(Tick, u32)> {
        let loadout = self.loadouts.get_mut(&player)?;
        if loadout.reload.is_some() {
            return None;
        }
        let weapon = loadout.weapons.get(loadout.active)?;
        if weapon.ammo >= weapon.stats.magazine {
            return None;
        }
        let due = tick + weapon.stats.reload_ticks;
        let token = loadout.next_token;
        loadout.next_token = loadout.next_token.wrapping_add(1);
        loadout.reload = Some(token);
        Some((due, token))
    }

    fn finish_reload(&mut self, player: PlayerId, token: u32) -> bool {
        let Some(loadout) = self.loadouts.get_mut(&player) else {
            return false;
        };
        if loadout.reload != Some(token) {
            debug!(player_id = %player, token, "Ignoring stale reload completion");
            return false;
        }
        loadout.reload = None;
        match loadout.active_mut() {
            Some(weapon) => {
                weapon.ammo = weapon.stats.magazine;
                true
            }
            None => false,
        }
    }

    fn cancel_reload(&mut self, player: PlayerId) -> bool {
        self.loadouts
            .get_mut(&player)
            .and_then(|l| l.reload.take())
            .is_some()
    }

    fn forget(&mut self, player: PlayerId) {
        self.loadouts.remove(&player);
    }
}

/// Apply damage to health, returns (new_health, is_dead)
pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
    let new_health = (current_health - damage).max(0.0);
    (new_health, new_health <= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PlayerId = PlayerId(1);

    fn armed() -> Arsenal {
        let mut arsenal = Arsenal::default();
        arsenal.equip(P);
        arsenal
    }

    #[test]
    fn fire_respects_interval_and_ammo() {
        let mut arsenal = armed();
        let rifle = WeaponStats::rifle();
        assert!(matches!(arsenal.try_fire(P, 10), FireClearance::Cleared(_)));
        assert_eq!(arsenal.try_fire(P, 10), FireClearance::Cooldown);

        let mut tick = 10;
        for _ in 1..rifle.magazine {
            tick += rifle.fire_interval;
            assert!(matches!(arsenal.try_fire(P, tick), FireClearance::Cleared(_)));
        }
        assert_eq!(arsenal.try_fire(P, tick + rifle.fire_interval), FireClearance::Empty);
        assert_eq!(arsenal.try_fire(PlayerId(2), 0), FireClearance::Unarmed);
    }

    #[test]
    fn reload_refills_and_blocks_fire() {
        let mut arsenal = armed();
        assert!(arsenal.begin_reload(P, 0).is_none(), "full magazine");
        arsenal.try_fire(P, 0);

        let (due, token) = arsenal.begin_reload(P, 5).unwrap();
        assert_eq!(due, 5 + WeaponStats::rifle().reload_ticks);
        assert_eq!(arsenal.try_fire(P, 100), FireClearance::Reloading);
        assert!(arsenal.finish_reload(P, token));
        assert_eq!(arsenal.ammo(P), Some(WeaponStats::rifle().magazine));
    }

    #[test]
    fn cancelled_reload_ignores_old_token() {
        let mut arsenal = armed();
        arsenal.try_fire(P, 0);
        let (_, first) = arsenal.begin_reload(P, 1).unwrap();
        assert!(arsenal.cancel_reload(P));
        let (_, second) = arsenal.begin_reload(P, 2).unwrap();
        assert!(!arsenal.finish_reload(P, first));
        assert!(arsenal.finish_reload(P, second));
    }

    #[test]
    fn switch_validates_slot() {
        let mut arsenal = armed();
        assert!(arsenal.switch(P, 1));
        assert!(!arsenal.switch(P, -1));
        assert!(!arsenal.switch(P, 9));
        match arsenal.try_fire(P, 0) {
            FireClearance::Cleared(stats) => assert_eq!(stats.name, "pistol"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn damage_clamps_and_reports_death() {
        assert_eq!(apply_damage(100.0, 25.0), (75.0, false));
        assert_eq!(apply_damage(10.0, 25.0), (0.0, true));
    }
}
