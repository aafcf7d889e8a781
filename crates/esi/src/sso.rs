use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// ESI scopes requested at login. The finder reads location, ship type, and
/// skills; the rest are carried over from the existing app registration so
/// stored refresh tokens keep working.
pub const SCOPES: &[&str] = &[
    "esi-location.read_location.v1",
    "esi-location.read_ship_type.v1",
    "esi-skills.read_skills.v1",
    "esi-clones.read_clones.v1",
    "esi-universe.read_structures.v1",
    "esi-location.read_online.v1",
];

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Decoded claims from an EVE SSO access token. The token is accepted from
/// the SSO over TLS right after the code exchange, so the payload is read
/// without signature verification, as the login flow only needs the identity.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtPayload {
    pub sub: String,
    /// Empty when the token carries no name claim; callers fall back to the
    /// public character sheet.
    #[serde(default)]
    pub name: String,
}

impl JwtPayload {
    /// `sub` looks like `CHARACTER:EVE:95465499`.
    pub fn character_id(&self) -> anyhow::Result<u64> {
        let id = self
            .sub
            .rsplit(':')
            .next()
            .context("empty jwt sub claim")?;
        id.parse()
            .with_context(|| format!("jwt sub claim {:?} has no character id", self.sub))
    }
}

pub fn decode_jwt_payload(token: &str) -> anyhow::Result<JwtPayload> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload)) = (parts.next(), parts.next()) else {
        bail!("malformed jwt: missing payload segment");
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .context("jwt payload is not base64url")?;
    serde_json::from_slice(&bytes).context("jwt payload is not valid json")
}

/// EVE SSO client: authorize-URL building, code exchange, refresh grant.
#[derive(Debug, Clone)]
pub struct SsoClient {
    http: reqwest::Client,
    login_base: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl SsoClient {
    pub fn new(
        login_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            login_base: login_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn authorize_url(&self, state: &str) -> String {
        let scopes = SCOPES.join(" ");
        let scope = urlencoding::encode(&scopes);
        let client_id = urlencoding::encode(&self.client_id);
        let redirect_uri = urlencoding::encode(&self.redirect_uri);
        let state = urlencoding::encode(state);
        format!(
            "{}/v2/oauth/authorize/?response_type=code&redirect_uri={redirect_uri}&client_id={client_id}&scope={scope}&state={state}",
            self.login_base
        )
    }

    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<TokenResponse> {
        self.token_grant(&[("grant_type", "authorization_code"), ("code", code)])
            .await
            .context("sso code exchange failed")
    }

    pub async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenResponse> {
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
        .context("sso token refresh failed")
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> anyhow::Result<TokenResponse> {
        let resp = self
            .http
            .post(format!("{}/v2/oauth/token", self.login_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("sso token endpoint returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}
