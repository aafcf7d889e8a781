use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use esi::sso::decode_jwt_payload;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;
use crate::store::{CharacterRecord, now_unix};

const STATE_COOKIE: &str = "cyno_auth_state";

/// OAuth state: mirrored between the redirect URL and an HttpOnly cookie so
/// the callback can tell its own redirects from forged ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AuthStatePayload {
    nonce: String,
    action: String,
    #[serde(default)]
    character_id: Option<u64>,
}

fn encode_state(payload: &AuthStatePayload) -> anyhow::Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?))
}

fn decode_state(state: &str) -> anyhow::Result<AuthStatePayload> {
    let bytes = URL_SAFE_NO_PAD
        .decode(state)
        .context("auth state is not base64url")?;
    serde_json::from_slice(&bytes).context("auth state is not valid json")
}

fn random_key_hex(nbytes: usize) -> String {
    let mut b = vec![0u8; nbytes];
    getrandom::getrandom(&mut b).expect("getrandom");
    let mut s = String::with_capacity(nbytes * 2);
    for x in b {
        s.push_str(&format!("{:02x}", x));
    }
    s
}

fn error_redirect(msg: &str) -> Redirect {
    Redirect::temporary(&format!("/?auth=error&message={}", urlencoding::encode(msg)))
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    character_id: Option<u64>,
}

/// Start the EVE SSO flow. `action=reauth&character_id=N` re-links an
/// existing character whose tokens went stale.
pub async fn login(
    State(st): State<AppState>,
    jar: CookieJar,
    Query(params): Query<LoginParams>,
) -> Response {
    let Some(sso) = st.sso.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "eve sso not configured\n").into_response();
    };

    let action = params.action.unwrap_or_else(|| "login".to_string());
    let payload = AuthStatePayload {
        nonce: random_key_hex(16),
        character_id: if action == "reauth" {
            params.character_id
        } else {
            None
        },
        action,
    };
    let state = match encode_state(&payload) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "auth state encode failed");
            return error_redirect("failed to start login").into_response();
        }
    };

    let cookie = Cookie::build((STATE_COOKIE, state.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(st.cookie_secure)
        .build();

    (jar.add(cookie), Redirect::temporary(&sso.authorize_url(&state))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// SSO callback: verify state against the cookie, trade the code for tokens,
/// pull the character's identity from the token, take an initial skill and
/// location snapshot, and store the character.
pub async fn callback(
    State(st): State<AppState>,
    jar: CookieJar,
    Query(q): Query<CallbackParams>,
) -> Response {
    let cookie_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build((STATE_COOKIE, "")).path("/").build());

    let Some(sso) = st.sso.as_deref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "eve sso not configured\n").into_response();
    };

    if let Some(err) = q.error.as_deref() {
        let msg = q.error_description.clone().unwrap_or_else(|| err.to_string());
        return (jar, error_redirect(&msg)).into_response();
    }
    let (Some(code), Some(state)) = (q.code.as_deref(), q.state.as_deref()) else {
        return (jar, error_redirect("missing code or state")).into_response();
    };
    if cookie_state.as_deref() != Some(state) {
        return (jar, error_redirect("state mismatch; please retry login")).into_response();
    }

    match complete_login(&st, sso, code, state).await {
        Ok(rec) => {
            info!(character = rec.character_id, name = %rec.character_name, "character linked");
            let to = format!("/?auth=success&character_id={}", rec.character_id);
            (jar, Redirect::temporary(&to)).into_response()
        }
        Err(e) => {
            warn!(err = %e, "sso callback failed");
            (jar, error_redirect(&e.to_string())).into_response()
        }
    }
}

async fn complete_login(
    st: &AppState,
    sso: &esi::SsoClient,
    code: &str,
    state: &str,
) -> anyhow::Result<CharacterRecord> {
    let payload = decode_state(state)?;

    let token = sso.exchange_code(code).await?;
    let claims = decode_jwt_payload(&token.access_token)?;
    let character_id = claims.character_id()?;

    // Some tokens omit the name claim; the public sheet always has it.
    let character_name = if claims.name.is_empty() {
        st.esi
            .character_public(character_id)
            .await
            .context("public character lookup failed")?
            .name
    } else {
        claims.name
    };

    if payload.action == "reauth"
        && let Some(expected) = payload.character_id
        && expected != character_id
    {
        anyhow::bail!(
            "logged in as {character_name} but re-auth was requested for character {expected}"
        );
    }

    let skill = st
        .esi
        .cyno_skill_level(character_id, &token.access_token)
        .await
        .context("skills fetch failed")?;

    // Initial position snapshot; a failure here is not fatal, the regular
    // location poll will fill it in.
    let (system_id, station_id, structure_id, ship_type_id, docked) = match tokio::try_join!(
        st.esi.location(character_id, &token.access_token),
        st.esi.ship(character_id, &token.access_token)
    ) {
        Ok((loc, ship)) => (
            Some(loc.solar_system_id),
            loc.station_id,
            loc.structure_id,
            Some(ship.ship_type_id),
            loc.docked(),
        ),
        Err(e) => {
            warn!(character = character_id, err = %e, "initial location fetch failed");
            (None, None, None, None, false)
        }
    };

    let rec = CharacterRecord {
        character_id,
        character_name,
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        solar_system_id: system_id,
        station_id,
        structure_id,
        ship_type_id,
        docked,
        cyno_skill_level: skill,
        is_auth_valid: true,
        updated_unix: now_unix(),
    };
    st.store.upsert(rec.clone()).await?;
    Ok(rec)
}
