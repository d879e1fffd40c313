//! Interfaces to systems outside the simulation core, with built-in defaults

use std::collections::HashMap;

use super::combat::{Arsenal, WeaponGate};
use super::types::PlayerId;

/// Maps asset keys (weapon names, impact kinds) to client clip names
pub trait AssetResolver: Send {
    fn clip_name(&self, key: &str) -> Option<String>;
}

/// Fixed key → clip table
#[derive(Debug, Clone)]
pub struct StaticAssets {
    clips: HashMap<String, String>,
}

impl StaticAssets {
    pub fn new<I, K, V>(clips: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            clips: clips
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Default for StaticAssets {
    fn default() -> Self {
        Self::new([
            ("rifle", "sfx/weapons/rifle_shot"),
            ("pistol", "sfx/weapons/pistol_shot"),
            ("marksman", "sfx/weapons/marksman_shot"),
        ])
    }
}

impl AssetResolver for StaticAssets {
    fn clip_name(&self, key: &str) -> Option<String> {
        self.clips.get(key).cloned()
    }
}

/// One inventory slot change to report back to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotUpdate {
    pub slot_id: String,
    pub item_id: String,
    pub amount: i32,
}

/// Inventory/slot stacking system
pub trait InventoryService: Send {
    fn transfer_slot(
        &mut self,
        player: PlayerId,
        from: &str,
        to: &str,
        mode: i32,
    ) -> Vec<SlotUpdate>;
    fn reduce_item(&mut self, player: PlayerId, item_id: &str, amount: i32) -> Vec<SlotUpdate>;
    fn forget(&mut self, player: PlayerId);
}

/// Inventory that holds nothing; every request is a no-op
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInventory;

impl InventoryService for NoInventory {
    fn transfer_slot(
        &mut self,
        _player: PlayerId,
        _from: &str,
        _to: &str,
        _mode: i32,
    ) -> Vec<SlotUpdate> {
        Vec::new()
    }

    fn reduce_item(&mut self, _player: PlayerId, _item_id: &str, _amount: i32) -> Vec<SlotUpdate> {
        Vec::new()
    }

    fn forget(&mut self, _player: PlayerId) {}
}

/// The external providers the scheduler consults
pub struct Collaborators {
    pub weapons: Box<dyn WeaponGate>,
    pub assets: Box<dyn AssetResolver>,
    pub inventory: Box<dyn InventoryService>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            weapons: Box::new(Arsenal::default()),
            assets: Box::new(StaticAssets::default()),
            inventory: Box::new(NoInventory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assets_resolve_known_keys() {
        let assets = StaticAssets::default();
        assert_eq!(assets.clip_name("rifle").as_deref(), Some("sfx/weapons/rifle_shot"));
        assert!(assets.clip_name("bazooka").is_none());
    }
}
