//! HTTP client for the session API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use livecode_core::{CodeExecutor, ExecutionResult, Language, RemoteError, SessionPatch, SessionRemote, SessionState};
use livecode_transport::{
    ConflictBody, ErrorBody, ExecuteRequest, HealthResponse, LoginRequest, SessionRecord,
    SignupRequest, TokenResponse, UpdateSessionRequest, UserRecord,
};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Covers the slowest execution limit plus runtime startup.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one session server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`).
    ///
    /// # Errors
    /// Returns `RemoteError::Network` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(network)?;
        Ok(Self::with_http(base_url, http))
    }

    /// Create a client over an existing `reqwest::Client`.
    #[must_use]
    pub fn with_http(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            token: None,
        }
    }

    /// Attach a bearer token used by `me` and `logout`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Replace or drop the bearer token.
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `/sessions/<id>[/<action>]` with the id percent-encoded as one
    /// path segment, so `#`, `?` and `/` stay part of the key.
    fn session_url(&self, id: &str, action: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Network(format!("Invalid base URL {}: {e}", self.base_url)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::Network(format!("Base URL cannot carry a path: {}", self.base_url))
            })?;
            segments.pop_if_empty().push("sessions").push(id);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    /// `GET /health`.
    ///
    /// # Errors
    /// Returns error if the server is unreachable or unhealthy.
    pub async fn health(&self) -> Result<HealthResponse, RemoteError> {
        send_json(self.http.get(self.url("/health"))).await
    }

    /// Register an account.
    ///
    /// # Errors
    /// Returns `RemoteError::Status` with code 400 if the email is taken.
    pub async fn signup(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> Result<UserRecord, RemoteError> {
        let body = SignupRequest {
            email: email.to_string(),
            full_name: full_name.to_string(),
            password: password.to_string(),
        };
        send_json(self.http.post(self.url("/auth/signup")).json(&body)).await
    }

    /// Log in and return the issued access token.
    ///
    /// The token is not attached to this client; use `with_token`.
    ///
    /// # Errors
    /// Returns `RemoteError::Status` with code 401 on bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, RemoteError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let token: TokenResponse = send_json(self.http.post(self.url("/auth/login")).json(&body)).await?;
        Ok(token.access_token)
    }

    /// Profile for the attached token.
    ///
    /// # Errors
    /// Returns `RemoteError::Status` with code 401 when no token is attached
    /// or the server rejects it.
    pub async fn me(&self) -> Result<UserRecord, RemoteError> {
        let token = self.token.as_deref().ok_or_else(missing_token)?;
        send_json(self.http.get(self.url("/auth/me")).bearer_auth(token)).await
    }

    /// Revoke the attached token.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn logout(&self) -> Result<(), RemoteError> {
        let token = self.token.as_deref().ok_or_else(missing_token)?;
        send(self.http.post(self.url("/auth/logout")).bearer_auth(token)).await?;
        Ok(())
    }

    /// Delete a session.
    ///
    /// # Errors
    /// Returns `RemoteError::Status` with code 404 if it does not exist.
    pub async fn delete_session(&self, id: &str) -> Result<(), RemoteError> {
        send(self.http.delete(self.session_url(id, None)?)).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRemote for ApiClient {
    async fn fetch(&self, id: &str) -> Result<SessionState, RemoteError> {
        let record: SessionRecord = send_json(self.http.get(self.session_url(id, None)?)).await?;
        Ok(record.into())
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, RemoteError> {
        let body = UpdateSessionRequest::from(patch);
        let record: SessionRecord =
            send_json(self.http.post(self.session_url(id, None)?).json(&body)).await?;
        Ok(record.into())
    }

    async fn join(&self, id: &str) -> Result<SessionState, RemoteError> {
        let record: SessionRecord = send_json(self.http.post(self.session_url(id, Some("join"))?)).await?;
        Ok(record.into())
    }

    async fn leave(&self, id: &str) -> Result<SessionState, RemoteError> {
        let record: SessionRecord = send_json(self.http.post(self.session_url(id, Some("leave"))?)).await?;
        Ok(record.into())
    }
}

#[async_trait]
impl CodeExecutor for ApiClient {
    async fn execute(&self, code: &str, language: Language) -> ExecutionResult {
        self.execute_tag(code, language.as_str()).await
    }

    /// Forwards the raw tag so the server reports unsupported languages.
    async fn execute_tag(&self, code: &str, tag: &str) -> ExecutionResult {
        let started = Instant::now();
        let body = ExecuteRequest {
            code: code.to_string(),
            language: tag.to_string(),
        };
        match send_json(self.http.post(self.url("/execute")).json(&body)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(language = %tag, "Execution request failed: {e}");
                ExecutionResult::failed("", format!("Execution request failed: {e}"), started.elapsed())
            }
        }
    }
}

fn network(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

fn missing_token() -> RemoteError {
    RemoteError::Status {
        code: StatusCode::UNAUTHORIZED.as_u16(),
        message: "Missing bearer token".to_string(),
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RemoteError> {
    send(request).await?.json().await.map_err(network)
}

/// Send a request and turn non-2xx answers into `RemoteError`.
async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request.send().await.map_err(network)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        if let Ok(body) = serde_json::from_str::<ConflictBody>(&text) {
            return Err(RemoteError::Conflict {
                current: Box::new(body.current.into()),
            });
        }
    }
    let message = serde_json::from_str::<ErrorBody>(&text).map_or(text, |body| body.message);
    Err(RemoteError::Status {
        code: status.as_u16(),
        message,
    })
}
