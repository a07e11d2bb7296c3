//! Session and authorization layer for the staffdesk employee-management client.
//!
//! The crate is composed bottom-up:
//! - `auth::store`: durable persistence of the current token and profile
//! - `auth::session`: the `SessionManager` state machine and HTTP client issuer
//! - `auth::guard`: per-navigation access decisions
//!
//! Pages talk to the backend only through the `ApiClient` returned by
//! `SessionManager::issue_http_client`, and gate rendering through `RouteGuard`.

pub mod api;
pub mod auth;
pub mod config;
pub mod routes;

pub use api::{ApiClient, ApiError, ApiResponse};
pub use auth::{
    CredentialStore, GuardConfig, GuardOutcome, LoginFlow, PersistedRecord, RouteGuard,
    SessionEvent, SessionManager, SessionState, SessionStatus, SessionUser,
};
pub use config::{Config, StorageBackend};
pub use routes::{RouteDecision, RouteTable};
