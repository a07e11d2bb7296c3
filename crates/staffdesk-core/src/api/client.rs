//! The authenticated API client handed out by `SessionManager`.
//!
//! Two hooks run around every request:
//! - outbound, `bearer_header` turns the token read from the store *at send
//!   time* into an `Authorization` header
//! - inbound, `classify_status` sorts the response; a credential rejection
//!   forces a logout of the session the request was sent under before the
//!   error is returned to the caller

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{SessionManager, SessionUser};

/// Verification endpoint for a stored token
pub const VERIFY_PATH: &str = "/api/auth/me";

/// Build the shared HTTP client: fixed timeout, JSON content type by default.
pub(crate) fn build_http(timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Outbound hook: the bearer header for a token, if there is one.
pub fn bearer_header(token: Option<&str>) -> Result<Option<header::HeaderValue>, ApiError> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidRequest("token is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    Ok(Some(value))
}

/// How the inbound hook treats a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// 401 or 403: the session is torn down.
    CredentialRejected,
    /// Any other failure; surfaced to the caller untouched.
    Failed,
}

/// Inbound hook: classify a status code.
pub fn classify_status(status: StatusCode) -> Disposition {
    match status.as_u16() {
        200..=299 => Disposition::Success,
        401 | 403 => Disposition::CredentialRejected,
        _ => Disposition::Failed,
    }
}

/// A decoded successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: T,
    epoch: u64,
}

impl<T> ApiResponse<T> {
    /// Session epoch the request was sent under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Backend client bound to a session.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    session: SessionManager,
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self {
            client: session.http().clone(),
            base_url: session.base_url().to_string(),
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, join_url(&self.base_url, path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.execute(self.request(Method::GET, path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(self.request(Method::POST, path).json(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(self.request(Method::PUT, path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.execute(self.request(Method::DELETE, path)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<ApiResponse<T>, ApiError> {
        let (epoch, token) = self.session.request_credentials();
        let builder = match bearer_header(token.as_deref())? {
            Some(value) => builder.header(header::AUTHORIZATION, value),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();

        match classify_status(status) {
            Disposition::Success => {
                // The server already answered; a broken body is not "no response".
                let bytes = response.bytes().await.map_err(|e| {
                    ApiError::InvalidResponse(format!("failed to read body from {}: {}", url, e))
                })?;
                let data = decode_body(&bytes)
                    .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, url)))?;
                debug!(%url, status = status.as_u16(), "Request succeeded");
                Ok(ApiResponse {
                    status: status.as_u16(),
                    data,
                    epoch,
                })
            }
            Disposition::CredentialRejected => {
                let body = response.text().await.unwrap_or_default();
                warn!(%url, status = status.as_u16(), "Request rejected, ending session");
                self.session.force_logout(epoch, status.as_u16());
                Err(ApiError::from_status(status, &body))
            }
            Disposition::Failed => {
                let body = response.text().await.unwrap_or_default();
                debug!(%url, status = status.as_u16(), "Request failed");
                Err(ApiError::from_status(status, &body))
            }
        }
    }
}

/// Empty bodies decode as JSON `null`, so `Value` and `Option<_>` targets work
/// with 204 responses.
fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(bytes)
    }
}

/// Check a stored token against the verification endpoint.
///
/// Goes through the raw client: a failure here only means the stored session
/// is unusable, so it must not trigger the forced-logout path. Returns the
/// server's profile when it sent one.
pub(crate) async fn verify_token(
    client: &Client,
    base_url: &str,
    token: &str,
) -> Result<Option<SessionUser>, ApiError> {
    let response = client
        .get(join_url(base_url, VERIFY_PATH))
        .bearer_auth(token)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::from_status(status, &body));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(format!("verification body: {}", e)))?;

    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(ApiError::InvalidResponse(
            "verification did not report success".to_string(),
        ));
    }

    match body.get("user") {
        None | Some(Value::Null) => Ok(None),
        Some(user) => SessionUser::project(user).map(Some).ok_or_else(|| {
            ApiError::InvalidResponse("verification returned an unusable user".to_string())
        }),
    }
}
