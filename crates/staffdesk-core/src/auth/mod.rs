//! Authentication module for managing the admin session.
//!
//! This module provides:
//! - `CredentialStore`: persistence of the session record (file, keyring, memory)
//! - `SessionManager`: the session state machine and issuer of the API client
//! - `RouteGuard`: render/redirect/deny decisions for protected views
//! - `LoginFlow`: the admin login exchange that feeds `SessionManager::login`
//!
//! The persisted record is written on login and removed on logout or on any
//! 401/403 from the backend.

pub mod guard;
pub mod login;
pub mod record;
pub mod session;
pub mod store;

pub use guard::{GuardConfig, GuardOutcome, RouteGuard};
pub use login::{LoginFailure, LoginFlow};
pub use record::{PersistedRecord, SessionUser};
pub use session::{SessionError, SessionEvent, SessionManager, SessionState, SessionStatus};
pub use store::{CredentialStore, FileStore, KeyringStore, MemoryStore};
