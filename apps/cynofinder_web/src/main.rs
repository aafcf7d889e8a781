mod api;
mod auth;
mod staticdata;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use esi::{EsiClient, RetryPolicy, SsoClient};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{Level, info};

use crate::staticdata::StaticData;
use crate::store::{CharacterStore, StoreRoster};

fn usage_and_exit() -> ! {
    eprintln!(
        "cynofinder_web

USAGE:
  cynofinder_web [--bind HOST:PORT] [--dir PATH] [--store PATH]
                 [--https-bind HOST:PORT --tls-cert PATH --tls-key PATH]

ENV:
  BIND                default 0.0.0.0:8080
  STATIC_DIR          default web
  CHARACTER_STORE     default data/characters.json
  SYSTEMS_TABLE       default data/solar_systems.json
  SHIPS_TABLE         default data/ship_types.json
  ESI_BASE_URL        default https://esi.evetech.net/latest
  ESI_TIMEOUT_S       default 5 (per-call bound on route/location queries)
  EVE_SSO_BASE_URL    default https://login.eveonline.com
  EVE_CLIENT_ID       required to enable EVE SSO login
  EVE_CLIENT_SECRET   required to enable EVE SSO login
  EVE_REDIRECT_URI    required to enable EVE SSO login
  COOKIE_SECURE       default 0 (set 1 behind TLS)
  HTTPS_BIND          optional
  TLS_CERT            required if HTTPS_BIND set
  TLS_KEY             required if HTTPS_BIND set
"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    http_bind: SocketAddr,
    https_bind: Option<SocketAddr>,
    static_dir: PathBuf,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    store_path: PathBuf,
    systems_path: PathBuf,
    ships_path: PathBuf,
    esi_base: String,
    esi_timeout: Duration,
    sso_base: String,
    eve_client_id: Option<String>,
    eve_client_secret: Option<String>,
    eve_redirect_uri: Option<String>,
    cookie_secure: bool,
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut https_bind: Option<SocketAddr> =
        std::env::var("HTTPS_BIND").ok().and_then(|v| v.parse().ok());

    let mut dir: PathBuf = std::env::var("STATIC_DIR")
        .unwrap_or_else(|_| "web".to_string())
        .into();

    let mut tls_cert: Option<PathBuf> = std::env::var("TLS_CERT").ok().map(Into::into);
    let mut tls_key: Option<PathBuf> = std::env::var("TLS_KEY").ok().map(Into::into);

    let mut store_path: PathBuf = std::env::var("CHARACTER_STORE")
        .unwrap_or_else(|_| "data/characters.json".to_string())
        .into();

    let systems_path: PathBuf = std::env::var("SYSTEMS_TABLE")
        .unwrap_or_else(|_| "data/solar_systems.json".to_string())
        .into();

    let ships_path: PathBuf = std::env::var("SHIPS_TABLE")
        .unwrap_or_else(|_| "data/ship_types.json".to_string())
        .into();

    let esi_base = std::env::var("ESI_BASE_URL")
        .unwrap_or_else(|_| "https://esi.evetech.net/latest".to_string());

    let esi_timeout = Duration::from_secs(
        std::env::var("ESI_TIMEOUT_S")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5),
    );

    let sso_base = std::env::var("EVE_SSO_BASE_URL")
        .unwrap_or_else(|_| "https://login.eveonline.com".to_string());

    let eve_client_id = std::env::var("EVE_CLIENT_ID").ok();
    let eve_client_secret = std::env::var("EVE_CLIENT_SECRET").ok();
    let eve_redirect_uri = std::env::var("EVE_REDIRECT_URI").ok();

    let cookie_secure = std::env::var("COOKIE_SECURE").is_ok_and(|v| v == "1" || v == "true");

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--https-bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                https_bind = Some(v.parse().unwrap_or_else(|_| usage_and_exit()));
            }
            "--dir" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                dir = v.into();
            }
            "--store" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                store_path = v.into();
            }
            "--tls-cert" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                tls_cert = Some(v.into());
            }
            "--tls-key" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                tls_key = Some(v.into());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        http_bind: bind,
        https_bind,
        static_dir: dir,
        tls_cert,
        tls_key,
        store_path,
        systems_path,
        ships_path,
        esi_base,
        esi_timeout,
        sso_base,
        eve_client_id,
        eve_client_secret,
        eve_redirect_uri,
        cookie_secure,
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: CharacterStore,
    pub data: Arc<StaticData>,
    pub esi: Arc<EsiClient>,
    pub sso: Option<Arc<SsoClient>>,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn roster(&self) -> StoreRoster {
        StoreRoster {
            store: self.store.clone(),
            data: self.data.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    let https_enabled = cfg.https_bind.is_some();
    if https_enabled && (cfg.tls_cert.is_none() || cfg.tls_key.is_none()) {
        eprintln!("ERROR: HTTPS_BIND set but TLS_CERT/TLS_KEY not set");
        std::process::exit(2);
    }

    let data = match StaticData::load(&cfg.systems_path, &cfg.ships_path) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            eprintln!("ERROR: static data load failed: {e:#}");
            std::process::exit(2);
        }
    };

    let store = match CharacterStore::open(&cfg.store_path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: character store open failed: {e:#}");
            std::process::exit(2);
        }
    };

    let esi = match EsiClient::new(&cfg.esi_base, cfg.esi_timeout, RetryPolicy::default()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("ERROR: esi client init failed: {e:#}");
            std::process::exit(2);
        }
    };

    let sso = match (
        cfg.eve_client_id.as_deref(),
        cfg.eve_client_secret.as_deref(),
        cfg.eve_redirect_uri.as_deref(),
    ) {
        (Some(id), Some(secret), Some(redirect)) => Some(Arc::new(SsoClient::new(
            cfg.sso_base.clone(),
            id,
            secret,
            redirect,
        ))),
        _ => {
            info!("EVE_CLIENT_ID/SECRET/REDIRECT_URI not all set; sso login disabled");
            None
        }
    };

    let state = AppState {
        store,
        data,
        esi,
        sso,
        cookie_secure: cfg.cookie_secure,
    };

    let service = ServeDir::new(&cfg.static_dir);
    let app_https = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/search", post(api::search))
        .route("/api/characters", get(api::characters))
        .route("/api/locations", get(api::locations))
        .route("/api/systems/search", get(api::systems_search))
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .with_state(state.clone())
        .fallback_service(service)
        .layer(TraceLayer::new_for_http());

    let app_http = if https_enabled {
        Router::new()
            .route("/healthz", get(|| async { "ok\n" }))
            .fallback(redirect_to_https)
            .layer(TraceLayer::new_for_http())
    } else {
        app_https.clone()
    };

    info!(
        http_bind = ?cfg.http_bind,
        https_bind = ?cfg.https_bind,
        static_dir = %cfg.static_dir.display(),
        store = %cfg.store_path.display(),
        esi_base = %cfg.esi_base,
        "starting cynofinder_web"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
        info!("shutdown signal received");
    });

    let mut joins = Vec::new();
    {
        let listener = tokio::net::TcpListener::bind(cfg.http_bind)
            .await
            .expect("http bind failed");
        let rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            axum::serve(listener, app_http)
                .with_graceful_shutdown(wait_for_shutdown(rx))
                .await
                .expect("http server failed");
        }));
    }

    if let (Some(https_bind), Some(cert), Some(key)) =
        (cfg.https_bind, cfg.tls_cert.as_ref(), cfg.tls_key.as_ref())
    {
        let rustls = RustlsConfig::from_pem_file(cert, key)
            .await
            .expect("invalid TLS_CERT/TLS_KEY");
        let rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            let handle = axum_server::Handle::new();

            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    wait_for_shutdown(rx).await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                });
            }

            axum_server::bind_rustls(https_bind, rustls)
                .handle(handle)
                .serve(app_https.into_make_service())
                .await
                .expect("https server failed");
        }));
    }

    for j in joins {
        let _ = j.await;
    }
}

async fn redirect_to_https(
    axum::extract::Host(host): axum::extract::Host,
    uri: axum::http::Uri,
) -> axum::response::Redirect {
    // Host may include :port; strip it for canonical redirects.
    let host = host.split(':').next().unwrap_or(&host);
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    axum::response::Redirect::permanent(&format!("https://{host}{path}"))
}

async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
