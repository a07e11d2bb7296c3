//! The session state machine.
//!
//! `Uninitialized -> Verifying -> {Authenticated, Unauthenticated}` at startup,
//! then `Authenticated <-> Unauthenticated` through login, logout and forced
//! logout. All transitions happen inside `watch::Sender::send_if_modified`, so a
//! check of the current state, the store write, and the new state are applied
//! as one step.
//!
//! Every login and every teardown bumps the session epoch. Requests remember the
//! epoch they were sent under, and their responses can only affect that epoch:
//! a late 401 cannot tear down a newer login, and a late success cannot bring
//! back a session that was already torn down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch, OnceCell};
use tracing::{debug, info, warn};

use super::record::{PersistedRecord, SessionUser};
use super::store::CredentialStore;
use crate::api::{client, ApiClient, ApiError, ApiResponse};
use crate::config::Config;

/// Capacity of the session event channel.
/// Observers that fall this far behind only miss intermediate events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum SessionStatus {
    Uninitialized,
    Verifying,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    /// Whether startup verification has finished one way or the other.
    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionStatus::Authenticated | SessionStatus::Unauthenticated)
    }
}

/// Snapshot of the in-memory session.
///
/// Constructed only through the transition helpers below, which keep `token`
/// and `user` present exactly when the status is `Authenticated`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    status: SessionStatus,
    token: Option<String>,
    user: Option<SessionUser>,
    authenticated_at: Option<DateTime<Utc>>,
    epoch: u64,
}

impl SessionState {
    fn uninitialized() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            token: None,
            user: None,
            authenticated_at: None,
            epoch: 0,
        }
    }

    fn verifying(epoch: u64) -> Self {
        Self {
            status: SessionStatus::Verifying,
            ..Self::unauthenticated(epoch)
        }
    }

    fn authenticated(token: String, user: SessionUser, epoch: u64) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            token: Some(token),
            user: Some(user),
            authenticated_at: Some(Utc::now()),
            epoch,
        }
    }

    fn unauthenticated(epoch: u64) -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            token: None,
            user: None,
            authenticated_at: None,
            epoch,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn role(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.role.as_str())
    }

    pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
        self.authenticated_at
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

/// Notifications for the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(SessionUser),
    SignedOut,
    /// The backend rejected the session's credentials; navigate to `redirect_to`.
    Invalidated { status: u16, redirect_to: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Token must not be empty")]
    EmptyToken,

    #[error("User data has no usable identifier")]
    InvalidUser,

    #[error("Failed to persist session: {0:#}")]
    Store(anyhow::Error),
}

/// Owner of the one session of this client instance.
///
/// Clone is cheap; every clone shares the same state, store and event channel.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    http: Client,
    base_url: String,
    login_path: String,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    init: OnceCell<()>,
}

impl SessionManager {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let http = client::build_http(config.request_timeout())?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                http,
                base_url: config.api_url.trim_end_matches('/').to_string(),
                login_path: config.login_path.clone(),
                state: watch::Sender::new(SessionState::uninitialized()),
                events,
                init: OnceCell::new(),
            }),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until startup verification has resolved and return that state.
    pub async fn wait_until_ready(&self) -> SessionState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|s| s.status().is_resolved()).await {
            Ok(state) => state.clone(),
            // The sender lives in `inner`, which we hold; this cannot close.
            Err(_) => self.state(),
        };
        state
    }

    pub fn login_path(&self) -> &str {
        &self.inner.login_path
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Epoch and bearer token for an outgoing request.
    ///
    /// The store is read under the state lock so the pair is consistent with
    /// any concurrent login or logout.
    pub(crate) fn request_credentials(&self) -> (u64, Option<String>) {
        let state = self.inner.state.borrow();
        let token = match self.inner.store.load() {
            Ok(record) => record.filter(|r| r.has_token()).map(|r| r.token),
            Err(e) => {
                warn!(error = %e, "Failed to read session record, sending request without token");
                None
            }
        };
        (state.epoch, token)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Restore the persisted session, verifying it with the backend.
    ///
    /// Runs at most once; later and concurrent calls wait for the first run.
    pub async fn initialize(&self) {
        self.inner
            .init
            .get_or_init(|| async { self.run_initialize().await })
            .await;
    }

    async fn run_initialize(&self) {
        let record = match self.inner.store.load() {
            Ok(Some(record)) if record.has_token() => record,
            Ok(Some(_)) => {
                debug!("Persisted session has no token, discarding");
                self.resolve_startup_without_session(true);
                return;
            }
            Ok(None) => {
                debug!("No persisted session");
                self.resolve_startup_without_session(false);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Unreadable persisted session, discarding");
                self.resolve_startup_without_session(true);
                return;
            }
        };

        let mut epoch = None;
        self.inner.state.send_if_modified(|s| {
            if s.status != SessionStatus::Uninitialized {
                return false;
            }
            *s = SessionState::verifying(s.epoch);
            epoch = Some(s.epoch);
            true
        });
        let Some(epoch) = epoch else {
            debug!("Session changed before startup verification, skipping");
            return;
        };

        debug!(epoch, "Verifying persisted session");
        match client::verify_token(&self.inner.http, &self.inner.base_url, &record.token).await {
            Ok(server_user) => {
                let user = server_user.unwrap_or(record.user);
                let applied = self.inner.state.send_if_modified(|s| {
                    if s.epoch != epoch || s.status != SessionStatus::Verifying {
                        return false;
                    }
                    *s = SessionState::authenticated(record.token.clone(), user.clone(), epoch);
                    true
                });
                if applied {
                    info!(user_id = %user.id, role = %user.role, "Session restored");
                    let _ = self.inner.events.send(SessionEvent::SignedIn(user));
                }
            }
            Err(e) => {
                warn!(error = %e, "Session verification failed");
                self.inner.state.send_if_modified(|s| {
                    if s.epoch != epoch || s.status != SessionStatus::Verifying {
                        return false;
                    }
                    self.clear_store();
                    *s = SessionState::unauthenticated(epoch + 1);
                    true
                });
            }
        }
    }

    fn resolve_startup_without_session(&self, clear: bool) {
        self.inner.state.send_if_modified(|s| {
            if s.status != SessionStatus::Uninitialized {
                return false;
            }
            if clear {
                self.clear_store();
            }
            *s = SessionState::unauthenticated(s.epoch);
            true
        });
    }

    /// Adopt a token and profile returned by a successful authentication call.
    ///
    /// The projected profile keeps only id, name, role and email. The record is
    /// persisted before the in-memory state changes; if persisting fails the
    /// session is left as it was.
    pub fn login(&self, token: &str, user_data: &Value) -> Result<SessionUser, SessionError> {
        self.establish(token, user_data, None).map(|(user, _)| user)
    }

    fn establish(
        &self,
        token: &str,
        user_data: &Value,
        expected_epoch: Option<u64>,
    ) -> Result<(SessionUser, bool), SessionError> {
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        let user = SessionUser::project(user_data).ok_or(SessionError::InvalidUser)?;
        let record = PersistedRecord::new(token, user.clone());

        let mut outcome = Ok(false);
        self.inner.state.send_if_modified(|s| {
            if let Some(expected) = expected_epoch {
                if s.epoch != expected || s.status != SessionStatus::Authenticated {
                    return false;
                }
            }
            if let Err(e) = self.inner.store.save(&record) {
                outcome = Err(SessionError::Store(e));
                return false;
            }
            *s = SessionState::authenticated(token.to_string(), user.clone(), s.epoch + 1);
            outcome = Ok(true);
            true
        });

        let applied = outcome?;
        if applied {
            info!(user_id = %user.id, role = %user.role, "Signed in");
            let _ = self.inner.events.send(SessionEvent::SignedIn(user.clone()));
        }
        Ok((user, applied))
    }

    /// Tear the session down. Safe to call in any state, any number of times.
    pub fn logout(&self) {
        let was_signed_in = self.teardown(None);
        if was_signed_in {
            info!("Signed out");
            let _ = self.inner.events.send(SessionEvent::SignedOut);
        }
    }

    /// Tear down the session a rejected request was sent under.
    ///
    /// Returns true only for the call that actually ended the session; stale
    /// rejections and repeats are no-ops, so at most one `Invalidated` event is
    /// published per session.
    pub fn force_logout(&self, issued_epoch: u64, status: u16) -> bool {
        let fired = self.teardown(Some(issued_epoch));
        if fired {
            warn!(status, "Credentials rejected by server, session invalidated");
            let _ = self.inner.events.send(SessionEvent::Invalidated {
                status,
                redirect_to: self.inner.login_path.clone(),
            });
        } else {
            debug!(status, issued_epoch, "Rejection for an already closed session ignored");
        }
        fired
    }

    /// Clears the store and moves to `Unauthenticated`.
    ///
    /// With `only_epoch`, nothing happens unless the session is still the one
    /// from that epoch. Returns whether a live session was ended.
    fn teardown(&self, only_epoch: Option<u64>) -> bool {
        let mut ended = false;
        self.inner.state.send_if_modified(|s| {
            if only_epoch.is_some_and(|e| e != s.epoch) {
                return false;
            }
            self.clear_store();
            if s.status == SessionStatus::Unauthenticated {
                return false;
            }
            ended = s.status == SessionStatus::Authenticated || only_epoch.is_some();
            *s = SessionState::unauthenticated(s.epoch + 1);
            true
        });
        ended
    }

    fn clear_store(&self) {
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear session record");
        }
    }

    // =========================================================================
    // Backend access
    // =========================================================================

    /// The client every page uses to reach the backend.
    pub fn issue_http_client(&self) -> ApiClient {
        ApiClient::new(self.clone())
    }

    /// Re-fetch the signed-in profile and replace the in-memory copy.
    ///
    /// Returns the new profile, or `None` if the server did not report success
    /// or the session changed while the call was in flight.
    pub async fn refresh_profile(&self) -> Result<Option<SessionUser>, ApiError> {
        let response: ApiResponse<Value> = self
            .issue_http_client()
            .get(client::VERIFY_PATH)
            .await?;

        if response.data.get("success").and_then(Value::as_bool) != Some(true) {
            debug!("Profile refresh returned no success flag");
            return Ok(None);
        }
        let Some(user) = response.data.get("user").and_then(SessionUser::project) else {
            return Ok(None);
        };

        let updated = self.inner.state.send_if_modified(|s| {
            if s.epoch != response.epoch() || s.status != SessionStatus::Authenticated {
                return false;
            }
            s.user = Some(user.clone());
            true
        });
        Ok(updated.then_some(user))
    }

    /// Adopt a refreshed `{ token, user }` piggybacked on a response.
    ///
    /// Ignored (returns `Ok(false)`) when the response carries no token or the
    /// session it was issued under is no longer current.
    pub fn adopt_refreshed(&self, response: &ApiResponse<Value>) -> Result<bool, SessionError> {
        let Some(token) = response.data.get("token").and_then(Value::as_str) else {
            return Ok(false);
        };
        let Some(user) = response.data.get("user") else {
            return Ok(false);
        };
        let (_, applied) = self.establish(token, user, Some(response.epoch()))?;
        Ok(applied)
    }
}
