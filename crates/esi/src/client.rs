use std::time::Duration;

use cynocore::{DistanceOracle, SystemId};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::retry::RetryPolicy;

/// Cynosural Field Theory.
const CYNO_SKILL_ID: u32 = 21603;

#[derive(Debug, thiserror::Error)]
pub enum EsiError {
    /// 401/403: the access token is stale or revoked. Callers refresh and
    /// retry; the retry policy never does.
    #[error("esi rejected credentials ({0})")]
    Unauthorized(StatusCode),
    #[error("esi request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("esi returned {status} for {path}")]
    Status { status: StatusCode, path: String },
}

impl EsiError {
    fn is_transient(&self) -> bool {
        match self {
            EsiError::Http(_) => true,
            EsiError::Status { status, .. } => status.is_server_error(),
            EsiError::Unauthorized(_) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterLocation {
    pub solar_system_id: u32,
    #[serde(default)]
    pub station_id: Option<u64>,
    #[serde(default)]
    pub structure_id: Option<u64>,
}

impl CharacterLocation {
    pub fn docked(&self) -> bool {
        self.station_id.is_some() || self.structure_id.is_some()
    }
}

/// Public character sheet, no token required.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacterPublic {
    pub name: String,
    #[serde(default)]
    pub corporation_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterShip {
    pub ship_type_id: u32,
    #[serde(default)]
    pub ship_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SkillEntry {
    skill_id: u32,
    trained_skill_level: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct SkillsResponse {
    skills: Vec<SkillEntry>,
}

impl SkillsResponse {
    fn cyno_level(&self) -> u8 {
        self.skills
            .iter()
            .find(|s| s.skill_id == CYNO_SKILL_ID)
            .map_or(0, |s| s.trained_skill_level)
    }
}

/// Thin ESI client. One reqwest client with a per-request timeout, one retry
/// policy for every call.
#[derive(Debug, Clone)]
pub struct EsiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl EsiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// Jump count between two systems; `Ok(None)` when ESI knows no route.
    /// The route payload lists every waypoint including both endpoints.
    pub async fn route(&self, origin: SystemId, dest: SystemId) -> Result<Option<u32>, EsiError> {
        let path = format!("/route/{origin}/{dest}/");
        let url = format!("{}{path}", self.base_url);
        self.retry
            .run("esi route", EsiError::is_transient, || {
                let http = self.http.clone();
                let url = url.clone();
                let path = path.clone();
                async move {
                    let resp = http.get(&url).send().await?;
                    if resp.status() == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if !resp.status().is_success() {
                        return Err(EsiError::Status {
                            status: resp.status(),
                            path,
                        });
                    }
                    let waypoints: Vec<u32> = resp.json().await?;
                    Ok(Some(route_jumps(&waypoints)))
                }
            })
            .await
    }

    /// Public character sheet; the login flow falls back to this for the
    /// character name when the SSO token carries none.
    pub async fn character_public(
        &self,
        character_id: u64,
    ) -> Result<CharacterPublic, EsiError> {
        let path = format!("/characters/{character_id}/");
        let url = format!("{}{path}", self.base_url);
        self.retry
            .run(&path, EsiError::is_transient, || {
                let http = self.http.clone();
                let url = url.clone();
                let path = path.clone();
                async move {
                    let resp = http.get(&url).send().await?;
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(EsiError::Status { status, path });
                    }
                    Ok(resp.json().await?)
                }
            })
            .await
    }

    pub async fn location(
        &self,
        character_id: u64,
        token: &str,
    ) -> Result<CharacterLocation, EsiError> {
        self.get_authed(&format!("/characters/{character_id}/location/"), token)
            .await
    }

    pub async fn ship(&self, character_id: u64, token: &str) -> Result<CharacterShip, EsiError> {
        self.get_authed(&format!("/characters/{character_id}/ship/"), token)
            .await
    }

    pub async fn cyno_skill_level(&self, character_id: u64, token: &str) -> Result<u8, EsiError> {
        let skills: SkillsResponse = self
            .get_authed(&format!("/characters/{character_id}/skills/"), token)
            .await?;
        Ok(skills.cyno_level())
    }

    async fn get_authed<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, EsiError> {
        let url = format!("{}{path}", self.base_url);
        self.retry
            .run(path, EsiError::is_transient, || {
                let http = self.http.clone();
                let url = url.clone();
                let path = path.to_string();
                let token = token.to_string();
                async move {
                    let resp = http.get(&url).bearer_auth(&token).send().await?;
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(EsiError::Unauthorized(status));
                    }
                    if !status.is_success() {
                        return Err(EsiError::Status { status, path });
                    }
                    Ok(resp.json().await?)
                }
            })
            .await
    }
}

fn route_jumps(waypoints: &[u32]) -> u32 {
    waypoints.len().saturating_sub(1) as u32
}

impl DistanceOracle for EsiClient {
    async fn jumps(&self, origin: SystemId, dest: SystemId) -> anyhow::Result<Option<u32>> {
        Ok(self.route(origin, dest).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_jumps_counts_edges_not_waypoints() {
        assert_eq!(route_jumps(&[]), 0);
        assert_eq!(route_jumps(&[30000142]), 0); // origin == destination
        assert_eq!(route_jumps(&[30000142, 30000144]), 1);
        assert_eq!(route_jumps(&[1, 2, 3, 4]), 3);
    }

    #[test]
    fn cyno_level_from_skills_payload() {
        let skills: SkillsResponse = serde_json::from_str(
            r#"{"skills":[
                {"skill_id":3300,"trained_skill_level":5},
                {"skill_id":21603,"trained_skill_level":4}
            ],"total_sp":500000}"#,
        )
        .unwrap();
        assert_eq!(skills.cyno_level(), 4);

        let none: SkillsResponse =
            serde_json::from_str(r#"{"skills":[],"total_sp":0}"#).unwrap();
        assert_eq!(none.cyno_level(), 0);
    }

    #[test]
    fn character_public_payload_parses() {
        let c: CharacterPublic = serde_json::from_str(
            r#"{"name":"Test Pilot","corporation_id":98000001,"birthday":"2010-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(c.name, "Test Pilot");
        assert_eq!(c.corporation_id, Some(98000001));
    }

    #[test]
    fn unauthorized_is_not_transient() {
        assert!(!EsiError::Unauthorized(StatusCode::UNAUTHORIZED).is_transient());
        assert!(
            EsiError::Status {
                status: StatusCode::BAD_GATEWAY,
                path: "/route/1/2/".to_string(),
            }
            .is_transient()
        );
        assert!(
            !EsiError::Status {
                status: StatusCode::BAD_REQUEST,
                path: "/route/1/2/".to_string(),
            }
            .is_transient()
        );
    }
}
