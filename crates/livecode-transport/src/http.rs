//! HTTP API for sessions, execution and accounts.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use livecode_core::{CodeExecutor, Language, SessionFilter, SessionStorage};
use livecode_session::{AccountStore, AuthError, ManagerError, SessionManager, UserProfile};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::protocol::{
    ConflictBody, ErrorBody, ExecuteRequest, HealthResponse, LoginRequest, SessionRecord,
    SignupRequest, TokenResponse, UpdateSessionRequest, UserRecord,
};

/// Session manager over any storage backend.
pub type DynSessionManager = SessionManager<Box<dyn SessionStorage>>;

/// HTTP layer configuration.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<DynSessionManager>,
    pub executor: Arc<dyn CodeExecutor>,
    pub accounts: Arc<AccountStore>,
}

impl AppState {
    /// Create state over a storage backend and an executor.
    #[must_use]
    pub fn new(storage: impl SessionStorage + 'static, executor: impl CodeExecutor + 'static) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(Box::new(storage))),
            executor: Arc::new(executor),
            accounts: Arc::new(AccountStore::new()),
        }
    }

    /// Replace the account store.
    #[must_use]
    pub fn with_accounts(mut self, accounts: AccountStore) -> Self {
        self.accounts = Arc::new(accounts);
        self
    }
}

/// API error, rendered as a JSON body with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] ManagerError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Session(ManagerError::Conflict { current }) => {
                let body = ConflictBody {
                    message: self.to_string(),
                    current: SessionRecord::from((**current).clone()),
                };
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            Self::Session(ManagerError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Auth(AuthError::EmailTaken(_) | AuthError::Invalid(_)) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::InvalidCredentials | AuthError::InvalidToken) | Self::MissingToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Session(ManagerError::Storage(_)) | Self::Internal(_) => {
                tracing::error!("Request failed: {self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the API router.
///
/// # Example
/// ```ignore
/// let app = router(state, &HttpConfig::default());
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn router(state: AppState, config: &HttpConfig) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route(
            "/sessions/{id}",
            get(get_session).post(update_session).delete(delete_session),
        )
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/events", get(session_events))
        .route("/execute", post(execute))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}

fn cors_layer(config: &HttpConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    language: Option<Language>,
    limit: Option<usize>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<SessionRecord>>> {
    let sessions = state
        .sessions
        .list(SessionFilter {
            language: query.language,
            limit: query.limit,
        })
        .await?;
    Ok(Json(sessions.into_iter().map(SessionRecord::from).collect()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    Ok(Json(state.sessions.get(&id).await?.into()))
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> ApiResult<Json<SessionRecord>> {
    let patch = body.into();
    Ok(Json(state.sessions.update(&id, &patch).await?.into()))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    Ok(Json(state.sessions.join(&id).await?.into()))
}

async fn leave_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    Ok(Json(state.sessions.leave(&id).await?.into()))
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let feed = state.sessions.subscribe(&id).await?;
    tracing::debug!(session_id = %id, observers = feed.observer_count(), "Event stream opened");
    Ok(Sse::new(feed.sse_stream(SessionRecord::from)).keep_alive(KeepAlive::default()))
}

async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Json<livecode_core::ExecutionResult> {
    let result = state.executor.execute_tag(&body.code, &body.language).await;
    tracing::info!(
        language = %body.language,
        success = result.success,
        elapsed_ms = result.execution_time_ms,
        "Code executed"
    );
    Json(result)
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> ApiResult<Json<UserRecord>> {
    let accounts = Arc::clone(&state.accounts);
    let profile = tokio::task::spawn_blocking(move || {
        accounts.signup(&body.email, &body.full_name, &body.password)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(user_record(profile)))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let accounts = Arc::clone(&state.accounts);
    let token = tokio::task::spawn_blocking(move || accounts.login(&body.email, &body.password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(TokenResponse::bearer(token)))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<UserRecord>> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    Ok(Json(user_record(state.accounts.me(token)?)))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    state.accounts.logout(token);
    Ok(StatusCode::NO_CONTENT)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn user_record(profile: UserProfile) -> UserRecord {
    UserRecord {
        id: profile.id,
        email: profile.email,
        full_name: profile.full_name,
    }
}
