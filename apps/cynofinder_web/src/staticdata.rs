use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_SYSTEM: &str = "Unknown System";
pub const UNKNOWN_SHIP: &str = "Unknown Ship";

#[derive(Debug, Clone, Deserialize)]
struct SystemEntry {
    solar_system_id: u32,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ShipEntry {
    ship_type_id: u32,
    name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SystemHit {
    pub solar_system_id: u32,
    pub name: String,
}

/// Solar-system and ship-type name tables, loaded once at startup from JSON
/// arrays. Lookups never fail; unknown ids get placeholder names.
#[derive(Debug, Default)]
pub struct StaticData {
    systems: HashMap<u32, String>,
    ships: HashMap<u32, String>,
}

impl StaticData {
    pub fn load(systems_path: &Path, ships_path: &Path) -> anyhow::Result<Self> {
        let systems: Vec<SystemEntry> = read_json(systems_path)
            .with_context(|| format!("loading systems table {}", systems_path.display()))?;
        let ships: Vec<ShipEntry> = read_json(ships_path)
            .with_context(|| format!("loading ships table {}", ships_path.display()))?;
        Ok(Self {
            systems: systems
                .into_iter()
                .map(|e| (e.solar_system_id, e.name))
                .collect(),
            ships: ships.into_iter().map(|e| (e.ship_type_id, e.name)).collect(),
        })
    }

    pub fn system_name(&self, id: u32) -> String {
        self.systems
            .get(&id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_SYSTEM.to_string())
    }

    pub fn ship_name(&self, id: u32) -> String {
        self.ships
            .get(&id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_SHIP.to_string())
    }

    /// Case-insensitive substring match over system names, alphabetical,
    /// capped at `limit`.
    pub fn search_systems(&self, query: &str, limit: usize) -> Vec<SystemHit> {
        let needle = query.trim().to_ascii_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut hits: Vec<SystemHit> = self
            .systems
            .iter()
            .filter(|(_, name)| name.to_ascii_lowercase().contains(&needle))
            .map(|(&id, name)| SystemHit {
                solar_system_id: id,
                name: name.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits.truncate(limit);
        hits
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
