//! Admin login exchange.
//!
//! Posts the employee ID and password to the backend and, on success, hands
//! the returned token and user to `SessionManager::login`. The request goes
//! through the session's raw HTTP client rather than the issued `ApiClient`:
//! a wrong password comes back as 401, and that must not look like a session
//! being revoked.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use super::record::SessionUser;
use super::session::{SessionError, SessionManager};
use crate::api::client::join_url;

/// Login endpoint for admins
pub const LOGIN_PATH: &str = "/api/auth/login-admin";

/// Consecutive failed attempts after which a security notice is shown.
pub const SECURITY_NOTICE_THRESHOLD: u32 = 10;

#[derive(Error, Debug)]
pub enum LoginFailure {
    #[error("Employee ID and password are required")]
    MissingCredentials,

    /// The server answered with an error; holds its message.
    #[error("{0}")]
    Server(String),

    #[error("No response from server. Please check your connection.")]
    NoResponse(#[source] reqwest::Error),

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
    user: Option<Value>,
}

/// One login form's worth of state: the session to sign into and the count
/// of consecutive failures.
pub struct LoginFlow {
    session: SessionManager,
    failed_attempts: u32,
}

impl LoginFlow {
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            failed_attempts: 0,
        }
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Whether enough attempts have failed to warn the user.
    pub fn security_notice(&self) -> bool {
        self.failed_attempts >= SECURITY_NOTICE_THRESHOLD
    }

    /// Authenticate and sign the session in.
    pub async fn submit(&mut self, emp_id: &str, password: &str) -> Result<SessionUser, LoginFailure> {
        let emp_id = emp_id.trim();
        if emp_id.is_empty() || password.is_empty() {
            return Err(LoginFailure::MissingCredentials);
        }

        match self.exchange(emp_id, password).await {
            Ok(user) => {
                self.failed_attempts = 0;
                info!(emp_id, "Admin login succeeded");
                Ok(user)
            }
            Err(e) => {
                self.failed_attempts += 1;
                warn!(emp_id, attempts = self.failed_attempts, error = %e, "Admin login failed");
                Err(e)
            }
        }
    }

    async fn exchange(&self, emp_id: &str, password: &str) -> Result<SessionUser, LoginFailure> {
        let url = join_url(self.session.base_url(), LOGIN_PATH);
        let response = self
            .session
            .http()
            .post(url)
            .json(&json!({ "empId": emp_id, "password": password }))
            .send()
            .await
            .map_err(LoginFailure::NoResponse)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("Login failed ({})", status.as_u16()));
            return Err(LoginFailure::Server(message));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|_| LoginFailure::InvalidResponse)?;

        match body {
            LoginResponse {
                success: true,
                token: Some(token),
                user: Some(user),
            } => Ok(self.session.login(&token, &user)?),
            _ => Err(LoginFailure::InvalidResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::{MemoryStore, SessionEvent, SessionStatus};
    use crate::config::Config;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn flow(url: &str) -> LoginFlow {
        let config = Config {
            api_url: url.to_string(),
            ..Config::default()
        };
        LoginFlow::new(SessionManager::new(&config, Arc::new(MemoryStore::new())).unwrap())
    }

    #[tokio::test]
    async fn test_login_success_signs_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "empId": "E-100", "password": "s3cret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "token": "jwt",
                "user": { "id": "u1", "name": "Asha", "role": "admin", "email": "a@example.com", "empId": "E-100" }
            })))
            .mount(&server)
            .await;

        let mut flow = flow(&server.uri());
        let user = flow.submit("  E-100 ", "s3cret").await.unwrap();

        assert_eq!(user.role, "admin");
        assert_eq!(flow.session.state().status(), SessionStatus::Authenticated);
        assert_eq!(flow.session.state().token(), Some("jwt"));
    }

    #[tokio::test]
    async fn test_wrong_password_is_not_forced_logout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid credentials" })),
            )
            .mount(&server)
            .await;

        let mut flow = flow(&server.uri());
        let mut events = flow.session.events();
        let err = flow.submit("E-100", "wrong").await.unwrap_err();

        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(flow.failed_attempts(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_message_when_body_has_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = flow(&server.uri()).submit("E-100", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed (500)");
    }

    #[tokio::test]
    async fn test_success_flag_missing_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "jwt" })))
            .mount(&server)
            .await;

        let err = flow(&server.uri()).submit("E-100", "pw").await.unwrap_err();
        assert!(matches!(err, LoginFailure::InvalidResponse));
        assert_eq!(err.to_string(), "Invalid response from server");
    }

    #[tokio::test]
    async fn test_no_response_message() {
        let err = flow("http://127.0.0.1:9").submit("E-100", "pw").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "No response from server. Please check your connection."
        );
    }

    #[tokio::test]
    async fn test_security_notice_after_repeated_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut flow = flow(&server.uri());
        for _ in 0..SECURITY_NOTICE_THRESHOLD - 1 {
            let _ = flow.submit("E-100", "wrong").await;
        }
        assert!(!flow.security_notice());
        let _ = flow.submit("E-100", "wrong").await;
        assert!(flow.security_notice());

        // Blank input never reaches the server or the counter.
        assert!(matches!(
            flow.submit("   ", "pw").await,
            Err(LoginFailure::MissingCredentials)
        ));
        assert_eq!(flow.failed_attempts(), SECURITY_NOTICE_THRESHOLD);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "empId": "E-100", "password": "wrong" })))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "empId": "E-100", "password": "right" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "token": "jwt", "user": { "id": "u1" }
            })))
            .mount(&server)
            .await;

        let mut flow = flow(&server.uri());
        let mut events = flow.session.events();
        let _ = flow.submit("E-100", "wrong").await;
        assert_eq!(flow.failed_attempts(), 1);

        flow.submit("E-100", "right").await.unwrap();
        assert_eq!(flow.failed_attempts(), 0);
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::SignedIn(_)));
    }
}
