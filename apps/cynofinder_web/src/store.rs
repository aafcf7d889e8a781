use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cynocore::{Candidate, CharacterId, RosterProvider, SystemId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::staticdata::StaticData;

/// One linked character: SSO tokens plus the last polled state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub character_id: u64,
    pub character_name: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub solar_system_id: Option<u32>,
    #[serde(default)]
    pub station_id: Option<u64>,
    #[serde(default)]
    pub structure_id: Option<u64>,
    #[serde(default)]
    pub ship_type_id: Option<u32>,
    #[serde(default)]
    pub docked: bool,
    #[serde(default)]
    pub cyno_skill_level: u8,
    #[serde(default)]
    pub is_auth_valid: bool,
    #[serde(default)]
    pub updated_unix: u64,
}

/// JSON-file character store. The whole roster is small (one corp's cyno
/// alts), so every mutation rewrites the file atomically via tmp+rename.
#[derive(Clone)]
pub struct CharacterStore {
    path: PathBuf,
    records: Arc<Mutex<Vec<CharacterRecord>>>,
}

impl CharacterStore {
    /// A missing file is an empty store, not an error.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing character store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        Ok(Self {
            path,
            records: Arc::new(Mutex::new(records)),
        })
    }

    pub async fn list(&self) -> Vec<CharacterRecord> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, character_id: u64) -> Option<CharacterRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.character_id == character_id)
            .cloned()
    }

    /// Insert or replace by character id.
    pub async fn upsert(&self, rec: CharacterRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.character_id == rec.character_id) {
            Some(slot) => *slot = rec,
            None => records.push(rec),
        }
        persist(&self.path, &records).await
    }

    /// Apply `f` to the record with this id; returns false if absent.
    pub async fn update(
        &self,
        character_id: u64,
        f: impl FnOnce(&mut CharacterRecord),
    ) -> anyhow::Result<bool> {
        let mut records = self.records.lock().await;
        let Some(rec) = records.iter_mut().find(|r| r.character_id == character_id) else {
            return Ok(false);
        };
        f(rec);
        rec.updated_unix = now_unix();
        persist(&self.path, &records).await?;
        Ok(true)
    }

    pub async fn mark_auth_invalid(&self, character_id: u64) -> anyhow::Result<bool> {
        self.update(character_id, |r| r.is_auth_valid = false).await
    }
}

async fn persist(path: &Path, records: &[CharacterRecord]) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Roster view over the store: maps stored records to engine candidates,
/// filling in display names from the static tables.
#[derive(Clone)]
pub struct StoreRoster {
    pub store: CharacterStore,
    pub data: Arc<StaticData>,
}

impl RosterProvider for StoreRoster {
    async fn roster(&self) -> anyhow::Result<Vec<Candidate>> {
        Ok(self
            .store
            .list()
            .await
            .into_iter()
            .map(|r| Candidate {
                character_id: CharacterId(r.character_id),
                character_name: r.character_name,
                system_id: r.solar_system_id.map(SystemId),
                system_name: r
                    .solar_system_id
                    .map_or_else(|| crate::staticdata::UNKNOWN_SYSTEM.to_string(), |id| {
                        self.data.system_name(id)
                    }),
                ship_name: r
                    .ship_type_id
                    .map_or_else(|| crate::staticdata::UNKNOWN_SHIP.to_string(), |id| {
                        self.data.ship_name(id)
                    }),
                cyno_skill_level: r.cyno_skill_level,
                is_auth_valid: r.is_auth_valid,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> CharacterRecord {
        CharacterRecord {
            character_id: id,
            character_name: format!("Pilot {id}"),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            solar_system_id: Some(30000142),
            station_id: None,
            structure_id: None,
            ship_type_id: Some(32880),
            docked: false,
            cyno_skill_level: 4,
            is_auth_valid: true,
            updated_unix: 0,
        }
    }

    #[tokio::test]
    async fn open_upsert_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characters.json");

        let store = CharacterStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());

        store.upsert(record(1)).await.unwrap();
        store.upsert(record(2)).await.unwrap();

        // Replacing an existing id keeps the list at two entries.
        let mut changed = record(1);
        changed.cyno_skill_level = 5;
        store.upsert(changed).await.unwrap();

        let reloaded = CharacterStore::open(&path).await.unwrap();
        let records = reloaded.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cyno_skill_level, 5);
    }

    #[tokio::test]
    async fn update_and_mark_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characters.json");
        let store = CharacterStore::open(&path).await.unwrap();
        store.upsert(record(7)).await.unwrap();

        assert!(store.mark_auth_invalid(7).await.unwrap());
        assert!(!store.mark_auth_invalid(999).await.unwrap());

        let rec = store.get(7).await.unwrap();
        assert!(!rec.is_auth_valid);
        assert!(rec.updated_unix > 0);
    }

    #[tokio::test]
    async fn roster_maps_records_to_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CharacterStore::open(dir.path().join("characters.json"))
            .await
            .unwrap();
        let mut nowhere = record(2);
        nowhere.solar_system_id = None;
        nowhere.ship_type_id = None;
        store.upsert(record(1)).await.unwrap();
        store.upsert(nowhere).await.unwrap();

        let roster = StoreRoster {
            store,
            data: Arc::new(StaticData::default()),
        };
        let candidates = roster.roster().await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].system_id, Some(SystemId(30000142)));
        assert_eq!(candidates[0].system_name, "Unknown System"); // empty table
        assert_eq!(candidates[1].system_id, None);
        assert_eq!(candidates[1].ship_name, "Unknown Ship");
    }
}
