//! Navigation table for the client.
//!
//! Maps a requested path to what should happen: render it, redirect, wait for
//! the session, or show the denied view. Protected prefixes delegate to a
//! `RouteGuard`; the longest matching prefix wins so a sub-area can demand a
//! role its parent does not.

use crate::auth::{GuardConfig, GuardOutcome, RouteGuard, SessionState, SessionStatus};
use crate::config::Config;

/// Public page for unknown paths
pub const NOT_FOUND_PATH: &str = "/404";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Render(String),
    Redirect(String),
    Loading,
    Denied { required_role: String },
}

impl From<(GuardOutcome, &str)> for RouteDecision {
    fn from((outcome, path): (GuardOutcome, &str)) -> Self {
        match outcome {
            GuardOutcome::Loading => RouteDecision::Loading,
            GuardOutcome::Redirect { to } => RouteDecision::Redirect(to),
            GuardOutcome::Denied { required_role } => RouteDecision::Denied { required_role },
            GuardOutcome::Allow => RouteDecision::Render(path.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum RouteKind {
    Public,
    /// Public, but a signed-in session is sent to `home` instead.
    Login { home: String },
    Redirect(String),
    Protected(RouteGuard),
}

#[derive(Debug, Clone)]
struct Route {
    path: String,
    prefix: bool,
    kind: RouteKind,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        if self.path == path {
            return true;
        }
        self.prefix
            && path
                .strip_prefix(self.path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client's standard layout: `/` goes home, the login page, a
    /// protected home area, and the not-found page.
    pub fn standard(config: &Config) -> Self {
        Self::new()
            .redirect("/", &config.home_path)
            .login(&config.login_path, &config.home_path)
            .protect(
                &config.home_path,
                GuardConfig::new().redirect_to(config.login_path.clone()),
            )
            .public(NOT_FOUND_PATH)
    }

    pub fn public(mut self, path: &str) -> Self {
        self.push(path, false, RouteKind::Public);
        self
    }

    pub fn login(mut self, path: &str, home: &str) -> Self {
        self.push(
            path,
            false,
            RouteKind::Login {
                home: home.to_string(),
            },
        );
        self
    }

    pub fn redirect(mut self, path: &str, to: &str) -> Self {
        self.push(path, false, RouteKind::Redirect(to.to_string()));
        self
    }

    /// Guard `path` and everything below it.
    pub fn protect(mut self, path: &str, config: GuardConfig) -> Self {
        self.push(path, true, RouteKind::Protected(RouteGuard::new(config)));
        self
    }

    fn push(&mut self, path: &str, prefix: bool, kind: RouteKind) {
        self.routes.push(Route {
            path: normalize(path),
            prefix,
            kind,
        });
    }

    /// Decide one navigation against the session as it is now.
    pub fn resolve(&self, path: &str, state: &SessionState) -> RouteDecision {
        let path = normalize(path);
        let route = self
            .routes
            .iter()
            .filter(|r| r.matches(&path))
            .max_by_key(|r| r.path.len());

        let Some(route) = route else {
            return RouteDecision::Redirect(NOT_FOUND_PATH.to_string());
        };

        match &route.kind {
            RouteKind::Public => RouteDecision::Render(path),
            RouteKind::Redirect(to) => RouteDecision::Redirect(to.clone()),
            RouteKind::Login { home } => match state.status() {
                SessionStatus::Uninitialized | SessionStatus::Verifying => RouteDecision::Loading,
                SessionStatus::Authenticated => RouteDecision::Redirect(home.clone()),
                SessionStatus::Unauthenticated => RouteDecision::Render(path),
            },
            RouteKind::Protected(guard) => (guard.evaluate(state), path.as_str()).into(),
        }
    }
}

/// Drop query and fragment, and any trailing slash except on the root.
fn normalize(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::{MemoryStore, SessionManager};
    use serde_json::json;

    fn session() -> SessionManager {
        SessionManager::new(&Config::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn table() -> RouteTable {
        RouteTable::standard(&Config::default())
            .protect("/dashboard/register-admin", GuardConfig::new().require_role("admin"))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/dashboard/"), "/dashboard");
        assert_eq!(normalize("dashboard/projects?page=2#top"), "/dashboard/projects");
    }

    #[tokio::test]
    async fn test_fixed_routes() {
        let session = session();
        let table = table();
        let state = session.state();

        assert_eq!(table.resolve("/", &state), RouteDecision::Redirect("/dashboard".to_string()));
        assert_eq!(table.resolve("/404", &state), RouteDecision::Render("/404".to_string()));
        assert_eq!(table.resolve("/nowhere", &state), RouteDecision::Redirect("/404".to_string()));
        // Prefix match requires a path boundary
        assert_eq!(
            table.resolve("/dashboardx", &state),
            RouteDecision::Redirect("/404".to_string())
        );
    }

    #[tokio::test]
    async fn test_protected_area_follows_session() {
        let session = session();
        let table = table();

        assert_eq!(table.resolve("/dashboard/projects", &session.state()), RouteDecision::Loading);

        session.initialize().await;
        assert_eq!(
            table.resolve("/dashboard/projects", &session.state()),
            RouteDecision::Redirect("/login".to_string())
        );

        session.login("tok", &json!({"id": "u1", "role": "employee"})).unwrap();
        assert_eq!(
            table.resolve("/dashboard/projects/p1", &session.state()),
            RouteDecision::Render("/dashboard/projects/p1".to_string())
        );
        assert_eq!(
            table.resolve("/dashboard/register-admin", &session.state()),
            RouteDecision::Denied {
                required_role: "admin".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_login_page() {
        let session = session();
        let table = table();

        assert_eq!(table.resolve("/login", &session.state()), RouteDecision::Loading);
        session.initialize().await;
        assert_eq!(
            table.resolve("/login", &session.state()),
            RouteDecision::Render("/login".to_string())
        );

        session.login("tok", &json!({"id": "u1"})).unwrap();
        assert_eq!(
            table.resolve("/login", &session.state()),
            RouteDecision::Redirect("/dashboard".to_string())
        );
    }
}
