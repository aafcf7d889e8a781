//! esi
//!
//! EVE ESI and SSO collaborators for the cyno finder: the route endpoint is
//! the engine's distance oracle, the character endpoints feed the roster
//! refresh, and `sso` covers login/token plumbing. Every outbound call goes
//! through one shared `RetryPolicy`.

pub mod client;
pub mod retry;
pub mod sso;

pub use client::{CharacterLocation, CharacterPublic, CharacterShip, EsiClient, EsiError};
pub use retry::RetryPolicy;
pub use sso::{SsoClient, TokenResponse};
