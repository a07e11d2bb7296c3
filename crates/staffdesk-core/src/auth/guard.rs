//! Access decisions for protected views.
//!
//! The guard never caches: every navigation evaluates the session as it is
//! right now, because a forced logout can land while a protected page is open.

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use super::session::{SessionManager, SessionState, SessionStatus};

/// Default login entry point
pub const DEFAULT_REDIRECT_PATH: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    #[serde(default)]
    pub required_role: Option<String>,
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
}

fn default_redirect_path() -> String {
    DEFAULT_REDIRECT_PATH.to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            required_role: None,
            redirect_path: default_redirect_path(),
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    pub fn redirect_to(mut self, path: impl Into<String>) -> Self {
        self.redirect_path = path.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum GuardOutcome {
    /// Startup verification still running; show a placeholder.
    Loading,
    Redirect { to: String },
    /// Signed in, but without the role this view needs.
    Denied {
        #[serde(rename = "requiredRole")]
        required_role: String,
    },
    Allow,
}

#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Decide for one session snapshot. Authentication is checked before role.
    pub fn evaluate(&self, state: &SessionState) -> GuardOutcome {
        match state.status() {
            SessionStatus::Uninitialized | SessionStatus::Verifying => GuardOutcome::Loading,
            SessionStatus::Unauthenticated => GuardOutcome::Redirect {
                to: self.config.redirect_path.clone(),
            },
            SessionStatus::Authenticated => match self.config.required_role.as_deref() {
                Some(required) if state.role() != Some(required) => GuardOutcome::Denied {
                    required_role: required.to_string(),
                },
                _ => GuardOutcome::Allow,
            },
        }
    }

    /// Decide against the session's current state; may be `Loading`.
    pub fn check(&self, session: &SessionManager) -> GuardOutcome {
        self.evaluate(&session.state())
    }

    /// Decide once startup verification has resolved; never `Loading`.
    pub async fn resolve(&self, session: &SessionManager) -> GuardOutcome {
        self.evaluate(&session.wait_until_ready().await)
    }

    /// The current outcome, then a new one after every session change.
    pub fn outcomes(&self, session: &SessionManager) -> impl Stream<Item = GuardOutcome> {
        let guard = self.clone();
        let rx = session.subscribe();

        stream::unfold((rx, true), move |(mut rx, first)| {
            let guard = guard.clone();
            async move {
                if !first {
                    rx.changed().await.ok()?;
                }
                let outcome = guard.evaluate(&rx.borrow_and_update());
                Some((outcome, (rx, false)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::{MemoryStore, PersistedRecord, SessionUser};
    use crate::config::Config;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(url: &str, store: MemoryStore) -> SessionManager {
        let config = Config {
            api_url: url.to_string(),
            ..Config::default()
        };
        SessionManager::new(&config, Arc::new(store)).unwrap()
    }

    fn admin_guard() -> RouteGuard {
        RouteGuard::new(GuardConfig::new().require_role("admin"))
    }

    #[test]
    fn test_guard_config_wire_shape() {
        let config: GuardConfig = serde_json::from_value(json!({ "requiredRole": "admin" })).unwrap();
        assert_eq!(config.required_role.as_deref(), Some("admin"));
        assert_eq!(config.redirect_path, "/login");
    }

    #[tokio::test]
    async fn test_loading_before_initialize() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        assert_eq!(RouteGuard::default().check(&session), GuardOutcome::Loading);
        assert_eq!(admin_guard().check(&session), GuardOutcome::Loading);
    }

    #[tokio::test]
    async fn test_fresh_start_redirects_to_login() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        let guard = RouteGuard::default();

        assert_eq!(guard.check(&session), GuardOutcome::Loading);
        session.initialize().await;
        assert_eq!(
            guard.check(&session),
            GuardOutcome::Redirect {
                to: "/login".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_valid_persisted_token_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "user": { "id": "u1", "name": "Asha", "role": "admin", "email": "a@example.com" }
            })))
            .mount(&server)
            .await;

        let record = PersistedRecord::new(
            "stored",
            SessionUser::project(&json!({"id": "u1", "role": "admin"})).unwrap(),
        );
        let session = manager(&server.uri(), MemoryStore::with_record(record));

        let guard = RouteGuard::default();
        let resolving = guard.resolve(&session);
        let (outcome, ()) = tokio::join!(resolving, session.initialize());
        assert_eq!(outcome, GuardOutcome::Allow);
    }

    #[tokio::test]
    async fn test_role_mismatch_is_denied_not_redirect() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        session.login("tok", &json!({"id": "u2", "role": "employee"})).unwrap();

        assert_eq!(
            admin_guard().check(&session),
            GuardOutcome::Denied {
                required_role: "admin".to_string()
            }
        );
        assert_eq!(RouteGuard::default().check(&session), GuardOutcome::Allow);
    }

    #[tokio::test]
    async fn test_unauthenticated_redirect_checked_before_role() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        session.logout();

        let guard = RouteGuard::new(
            GuardConfig::new()
                .require_role("admin")
                .redirect_to("/signin"),
        );
        assert_eq!(
            guard.check(&session),
            GuardOutcome::Redirect {
                to: "/signin".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_login_then_guard_allows_matching_role() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        session.initialize().await;
        session.login("tok", &json!({"id": "u1", "role": "admin"})).unwrap();
        assert_eq!(admin_guard().check(&session), GuardOutcome::Allow);
    }

    #[tokio::test]
    async fn test_outcomes_follow_session_changes() {
        let session = manager("http://localhost:5000", MemoryStore::new());
        let guard = RouteGuard::default();
        let mut outcomes = Box::pin(guard.outcomes(&session));

        assert_eq!(outcomes.next().await, Some(GuardOutcome::Loading));

        session.initialize().await;
        assert_eq!(
            outcomes.next().await,
            Some(GuardOutcome::Redirect {
                to: "/login".to_string()
            })
        );

        session.login("tok", &json!({"id": "u1"})).unwrap();
        assert_eq!(outcomes.next().await, Some(GuardOutcome::Allow));

        let epoch = session.state().epoch();
        session.force_logout(epoch, 401);
        assert_eq!(
            outcomes.next().await,
            Some(GuardOutcome::Redirect {
                to: "/login".to_string()
            })
        );
    }
}
