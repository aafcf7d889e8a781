use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cynocore::{
    CharacterId, RosterProvider, SystemId, TargetAssignments, TargetRequest, compute_assignments,
};
use esi::{CharacterLocation, CharacterShip, EsiError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;
use crate::staticdata::SystemHit;
use crate::store::CharacterRecord;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    systems: Vec<SearchTarget>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTarget {
    system_id: u32,
    #[serde(default)]
    system_name: Option<String>,
    priority: u32,
    #[serde(default)]
    locked_character: Option<u64>,
    #[serde(default)]
    excluded_characters: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    success: bool,
    results: BTreeMap<SystemId, TargetAssignments>,
    timestamp: String,
}

/// One assignment pass over the current roster. Validation problems are 400s;
/// route-service failures never surface here, they degrade to unreachable
/// rows inside the engine.
pub async fn search(State(st): State<AppState>, Json(req): Json<SearchRequest>) -> Response {
    if req.systems.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing systems array in request body",
        );
    }

    let targets: Vec<TargetRequest> = req
        .systems
        .into_iter()
        .map(|t| TargetRequest {
            system_id: SystemId(t.system_id),
            system_name: t
                .system_name
                .unwrap_or_else(|| st.data.system_name(t.system_id)),
            priority: t.priority,
            locked_character: t.locked_character.map(CharacterId),
            excluded_characters: t.excluded_characters.into_iter().map(CharacterId).collect(),
        })
        .collect();

    let provider = st.roster();
    let roster = match provider.roster().await {
        Ok(r) => r,
        Err(e) => {
            warn!(err = %e, "roster fetch failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load roster");
        }
    };

    match compute_assignments(&targets, &roster, st.esi.as_ref()).await {
        Ok(results) => Json(SearchResponse {
            success: true,
            results,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct CharacterSummary {
    character_id: u64,
    character_name: String,
    solar_system_id: Option<u32>,
    solar_system_name: String,
    ship_type_id: Option<u32>,
    ship_name: String,
    cyno_skill_level: u8,
    is_auth_valid: bool,
    updated_unix: u64,
}

#[derive(Debug, Serialize)]
struct CharactersResponse {
    characters: Vec<CharacterSummary>,
    total: usize,
}

/// Cyno-capable roster listing for the UI dropdowns.
pub async fn characters(State(st): State<AppState>) -> Response {
    let characters: Vec<CharacterSummary> = st
        .store
        .list()
        .await
        .into_iter()
        .filter(|r| r.cyno_skill_level > 0)
        .map(|r| CharacterSummary {
            character_id: r.character_id,
            character_name: r.character_name,
            solar_system_id: r.solar_system_id,
            solar_system_name: r
                .solar_system_id
                .map_or_else(|| crate::staticdata::UNKNOWN_SYSTEM.to_string(), |id| {
                    st.data.system_name(id)
                }),
            ship_type_id: r.ship_type_id,
            ship_name: r
                .ship_type_id
                .map_or_else(|| crate::staticdata::UNKNOWN_SHIP.to_string(), |id| {
                    st.data.ship_name(id)
                }),
            cyno_skill_level: r.cyno_skill_level,
            is_auth_valid: r.is_auth_valid,
            updated_unix: r.updated_unix,
        })
        .collect();

    let total = characters.len();
    Json(CharactersResponse { characters, total }).into_response()
}

#[derive(Debug, Serialize)]
struct LastKnown {
    solar_system_id: Option<u32>,
    station_id: Option<u64>,
    structure_id: Option<u64>,
    ship_type_id: Option<u32>,
    docked: bool,
}

impl LastKnown {
    fn of(rec: &CharacterRecord) -> Self {
        Self {
            solar_system_id: rec.solar_system_id,
            station_id: rec.station_id,
            structure_id: rec.structure_id,
            ship_type_id: rec.ship_type_id,
            docked: rec.docked,
        }
    }
}

#[derive(Debug, Serialize)]
struct LocationEntry {
    character_id: u64,
    character_name: String,
    needs_reauth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    solar_system_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    solar_system_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ship_type_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_known: Option<LastKnown>,
}

#[derive(Debug, Serialize)]
struct LocationsResponse {
    success: bool,
    locations: Vec<LocationEntry>,
    timestamp: String,
}

/// Poll ESI for every auth-valid character's location and ship, write the
/// results back to the store, and flag characters whose tokens no longer
/// work. One character's failure never aborts the rest.
pub async fn locations(State(st): State<AppState>) -> Response {
    let mut locations = Vec::new();

    for rec in st.store.list().await {
        if !rec.is_auth_valid {
            locations.push(LocationEntry {
                character_id: rec.character_id,
                character_name: rec.character_name.clone(),
                needs_reauth: true,
                solar_system_id: None,
                solar_system_name: None,
                ship_type_id: None,
                docked: None,
                error: None,
                last_known: Some(LastKnown::of(&rec)),
            });
            continue;
        }

        match poll_character(&st, &rec).await {
            Ok((loc, ship)) => {
                let docked = loc.docked();
                if let Err(e) = st
                    .store
                    .update(rec.character_id, |r| {
                        r.solar_system_id = Some(loc.solar_system_id);
                        r.station_id = loc.station_id;
                        r.structure_id = loc.structure_id;
                        r.ship_type_id = Some(ship.ship_type_id);
                        r.docked = docked;
                    })
                    .await
                {
                    warn!(character = rec.character_id, err = %e, "store write failed");
                }
                locations.push(LocationEntry {
                    character_id: rec.character_id,
                    character_name: rec.character_name.clone(),
                    needs_reauth: false,
                    solar_system_id: Some(loc.solar_system_id),
                    solar_system_name: Some(st.data.system_name(loc.solar_system_id)),
                    ship_type_id: Some(ship.ship_type_id),
                    docked: Some(docked),
                    error: None,
                    last_known: None,
                });
            }
            Err(e) => {
                warn!(character = rec.character_id, err = %e, "location refresh failed; marking reauth");
                if let Err(e) = st.store.mark_auth_invalid(rec.character_id).await {
                    warn!(character = rec.character_id, err = %e, "store write failed");
                }
                locations.push(LocationEntry {
                    character_id: rec.character_id,
                    character_name: rec.character_name.clone(),
                    needs_reauth: true,
                    solar_system_id: None,
                    solar_system_name: None,
                    ship_type_id: None,
                    docked: None,
                    error: Some(e.to_string()),
                    last_known: Some(LastKnown::of(&rec)),
                });
            }
        }
    }

    Json(LocationsResponse {
        success: true,
        locations,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// Location + ship for one character, both requests in flight at once. A
/// 401/403 triggers a single refresh-and-retry before giving up.
async fn poll_character(
    st: &AppState,
    rec: &CharacterRecord,
) -> anyhow::Result<(CharacterLocation, CharacterShip)> {
    let id = rec.character_id;
    match tokio::try_join!(
        st.esi.location(id, &rec.access_token),
        st.esi.ship(id, &rec.access_token)
    ) {
        Ok(pair) => Ok(pair),
        Err(EsiError::Unauthorized(_)) => {
            let Some(sso) = st.sso.as_ref() else {
                anyhow::bail!("token expired and sso is not configured");
            };
            let token = sso.refresh(&rec.refresh_token).await?;
            let access = token.access_token.clone();
            st.store
                .update(id, |r| {
                    r.access_token = token.access_token.clone();
                    r.refresh_token = token.refresh_token.clone();
                })
                .await?;
            Ok(tokio::try_join!(
                st.esi.location(id, &access),
                st.esi.ship(id, &access)
            )?)
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SystemSearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize)]
struct SystemSearchResponse {
    systems: Vec<SystemHit>,
}

pub async fn systems_search(
    State(st): State<AppState>,
    Query(params): Query<SystemSearchParams>,
) -> Response {
    if params.q.trim().len() < 3 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "query must be at least 3 characters long",
        );
    }
    Json(SystemSearchResponse {
        systems: st.data.search_systems(&params.q, 10),
    })
    .into_response()
}
