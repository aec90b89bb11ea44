//! REST API server.
//!
//! # Endpoints
//!
//! All paths are mounted under `[server].api_prefix` (default `/api/v1`).
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | – | Liveness |
//! | `GET`  | `/health/ready` | – | Per-component readiness |
//! | `POST` | `/auth/login` | – | Exchange the password for a session token |
//! | `POST` | `/auth/validate` | – | Check a session token |
//! | `POST` | `/auth/logout` | – | Revoke a session token |
//! | `GET`  | `/documents` | key + token | List the caller's documents |
//! | `POST` | `/documents` | key + token | Upload a PDF (multipart `file`, optional `title`) |
//! | `GET`  | `/documents/{id}` | key + token | Document detail with chunk previews |
//! | `DELETE` | `/documents/{id}` | key + token | Delete a document |
//! | `POST` | `/query` | key + token | Ask a question |
//! | `GET`  | `/system/info` | – | Limits, pricing, version |
//! | `GET`  | `/system/usage` | – | Today's usage |
//!
//! # Error Contract
//!
//! Every error body has a single `detail` field, either a string or, for
//! insufficient-evidence refusals, an object:
//!
//! ```json
//! { "detail": "Document not found: 0b6c..." }
//! { "detail": { "message": "...", "reason": "no_relevant_chunks", "suggestions": [], "partial_context": [] } }
//! ```

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{check_api_key, AuthFailure, SessionStore, API_KEY_HEADER, USER_TOKEN_HEADER};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::extract::{ExtractError, PageExtractor, PdfExtractor};
use crate::ingest::{self, IngestError, Upload};
use crate::migrate;
use crate::models::{
    ComponentStatus, DeleteResponse, DocumentListResponse, HealthResponse, LoginRequest,
    LoginResponse, PricingInfo, QueryRequest, ReadinessResponse, StatusMessage,
    SystemInfoResponse, SystemLimits, TokenRequest, UsageResponse, ValidateResponse,
};
use crate::query::{self, QueryError};
use crate::store;
use crate::usage::CostTracker;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub sessions: Arc<SessionStore>,
    pub tracker: CostTracker,
    pub extractor: Arc<dyn PageExtractor>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    api_key: Arc<str>,
    password: Arc<str>,
}

impl AppState {
    /// Opens the database (running migrations), resolves the embedding
    /// provider, and reads the server secrets.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let (api_key, password) = config.server_secrets()?;
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);

        Ok(Self {
            config: Arc::new(config.clone()),
            tracker: CostTracker::new(pool.clone(), config.limits.clone()),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(
                config.server.session_ttl_secs,
            ))),
            pool,
            extractor: Arc::new(PdfExtractor),
            embedder,
            api_key: Arc::from(api_key),
            password: Arc::from(password),
        })
    }

    /// Replaces the PDF text extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    serve(listener, state).await
}

/// Serves on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(
        %addr,
        prefix = %state.config.server.api_prefix,
        environment = %state.config.server.environment,
        "legal-rag listening"
    );
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

/// Body limit for all routes: four times the file size limit, plus 1 MB.
fn upload_body_limit(max_file_size_mb: usize) -> usize {
    max_file_size_mb
        .saturating_mul(4)
        .saturating_add(1)
        .saturating_mul(1024 * 1024)
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = upload_body_limit(state.config.limits.max_file_size_mb);

    let api = Router::new()
        .route("/health", get(handle_health))
        .route("/health/ready", get(handle_ready))
        .route("/auth/login", post(handle_login))
        .route("/auth/validate", post(handle_validate))
        .route("/auth/logout", post(handle_logout))
        .route(
            "/documents",
            get(handle_list_documents).post(handle_upload_document),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/query", post(handle_query))
        .route("/system/info", get(handle_system_info))
        .route("/system/usage", get(handle_system_usage));

    let prefix = state.config.server.api_prefix.trim_end_matches('/').to_string();
    let router = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}

// ============ Error response ============

/// Error converted into a `{"detail": ...}` response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    detail: serde_json::Value,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            detail: serde_json::Value::String(message.into()),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<AuthFailure> for AppError {
    fn from(f: AuthFailure) -> Self {
        let status = StatusCode::from_u16(f.status()).unwrap_or(StatusCode::UNAUTHORIZED);
        AppError::new(status, f.message())
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::LimitReached(_) => AppError::new(StatusCode::CONFLICT, e.to_string()),
            IngestError::Invalid(_) | IngestError::NoText => {
                AppError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            IngestError::Embedding(ref err) => {
                warn!(error = %err, "embedding failed during upload");
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            IngestError::Storage(err) => AppError::internal(err),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Validation(msg) => AppError::new(StatusCode::UNPROCESSABLE_ENTITY, msg),
            QueryError::LimitExceeded(msg) => AppError::new(StatusCode::TOO_MANY_REQUESTS, msg),
            QueryError::NoDocuments => AppError::new(StatusCode::BAD_REQUEST, e.to_string()),
            QueryError::InsufficientEvidence(detail) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                detail: serde_json::to_value(detail).unwrap_or_default(),
            },
            QueryError::Upstream(ref err) => {
                warn!(error = %err, "upstream model call failed");
                AppError::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
            QueryError::Storage(err) => AppError::internal(err),
        }
    }
}

// ============ Authentication ============

/// The caller of a protected route, resolved from `X-API-Key` and
/// `X-User-Token`.
pub struct AuthedUser(pub String);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        check_api_key(header_str(&parts.headers, API_KEY_HEADER), &state.api_key)?;
        let user_id = state
            .sessions
            .authenticate(header_str(&parts.headers, USER_TOKEN_HEADER))
            .await?;
        Ok(AuthedUser(user_id))
    }
}

// ============ Health ============

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

async fn handle_ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let components = ComponentStatus {
        vector_store: store::ping(&state.pool).await,
        embedding_model: state.config.embedding.is_enabled(),
        llm_api: state.config.llm.is_enabled(),
    };
    Json(ReadinessResponse {
        ready: components.vector_store && components.embedding_model && components.llm_api,
        components,
    })
}

// ============ Auth ============

async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    match state.sessions.login(&req.password, &state.password).await {
        Some(issued) => {
            info!(user_id = %issued.user_id, "login");
            Ok(Json(LoginResponse {
                success: true,
                token: Some(issued.token),
                user_id: Some(issued.user_id),
                message: "Login successful".to_string(),
            }))
        }
        None => Err(AppError::new(StatusCode::UNAUTHORIZED, "Invalid password")),
    }
}

async fn handle_validate(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: state.sessions.validate(&req.token).await,
    })
}

async fn handle_logout(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Json<StatusMessage> {
    state.sessions.logout(&req.token).await;
    Json(StatusMessage {
        success: true,
        message: "Logged out".to_string(),
    })
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = store::list_documents(&state.pool, &user_id)
        .await
        .map_err(AppError::internal)?;
    let total = documents.len();
    Ok(Json(DocumentListResponse {
        documents,
        total,
        limit_reached: total >= state.config.limits.max_documents,
    }))
}

async fn handle_upload_document(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let max_mb = state.config.limits.max_file_size_mb;
    let multipart_error = |e: MultipartError| {
        if e.status() != StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::new(StatusCode::BAD_REQUEST, e.body_text());
        }
        let size_bytes = header_str(&headers, "content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or_else(|| upload_body_limit(max_mb));
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
        AppError::new(
            StatusCode::BAD_REQUEST,
            ExtractError::TooLarge { size_mb, max_mb }.to_string(),
        )
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(multipart_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(multipart_error)?;
                title = Some(text);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "Missing 'file' field"))?;

    let response = ingest::ingest_upload(
        &state.pool,
        &state.config,
        state.extractor.clone(),
        state.embedder.as_ref(),
        &user_id,
        Upload {
            filename,
            bytes,
            title,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn handle_get_document(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match store::get_document(&state.pool, &user_id, &id)
        .await
        .map_err(AppError::internal)?
    {
        Some(detail) => Ok(Json(detail).into_response()),
        None => Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("Document not found: {}", id),
        )),
    }
}

async fn handle_delete_document(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    match store::delete_document(&state.pool, &user_id, &id)
        .await
        .map_err(AppError::internal)?
    {
        Some(chunks_removed) => {
            info!(document_id = %id, chunks_removed, "document deleted");
            Ok(Json(DeleteResponse {
                success: true,
                message: "Document deleted successfully.".to_string(),
                chunks_removed,
            }))
        }
        None => Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("Document not found: {}", id),
        )),
    }
}

// ============ Query ============

async fn handle_query(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let response = query::run_query(
        &state.pool,
        &state.config,
        &state.tracker,
        state.embedder.as_ref(),
        &user_id,
        req,
    )
    .await?;
    Ok(Json(response).into_response())
}

// ============ System ============

async fn handle_system_info(State(state): State<AppState>) -> Json<SystemInfoResponse> {
    let config = &state.config;
    Json(SystemInfoResponse {
        limits: SystemLimits {
            max_documents: config.limits.max_documents,
            max_pages_per_document: config.limits.max_pages_per_document,
            max_file_size_mb: config.limits.max_file_size_mb,
            max_question_length: config.limits.max_question_length,
            max_daily_queries: config.limits.max_daily_queries,
        },
        pricing: PricingInfo {
            llm_model: config.llm.model.clone(),
            input_token_cost_per_1k: config.llm.input_cost_per_1k,
            output_token_cost_per_1k: config.llm.output_cost_per_1k,
            embedding_model: state.embedder.model_name().to_string(),
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: config.server.environment.clone(),
    })
}

async fn handle_system_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, AppError> {
    let usage = state.tracker.today().await.map_err(AppError::internal)?;

    let user_id = match header_str(&headers, USER_TOKEN_HEADER) {
        Some(token) => state.sessions.user_id(token).await,
        None => None,
    };
    let documents_stored = store::count_documents(&state.pool, user_id.as_deref())
        .await
        .map_err(AppError::internal)?;

    Ok(Json(UsageResponse {
        total_tokens_used: usage.total_tokens(),
        period: usage.day,
        queries_today: usage.queries,
        total_cost_usd: usage.cost_usd,
        documents_stored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (TempDir, AppState) {
        state_with(|_| {}).await
    }

    async fn state_with(adjust: impl FnOnce(&mut Config)) -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("server.sqlite");
        config.auth.api_key = Some("test-key".to_string());
        config.auth.app_password = Some("hunter22".to_string());
        adjust(&mut config);
        let state = AppState::new(&config).await.unwrap();
        (tmp, state)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, state) = test_state().await;
        let resp = build_router(state)
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_reports_disabled_providers() {
        let (_tmp, state) = test_state().await;
        let resp = build_router(state)
            .oneshot(
                Request::get("/api/v1/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["ready"], false);
        assert_eq!(body["components"]["vector_store"], true);
        assert_eq!(body["components"]["llm_api"], false);
    }

    #[tokio::test]
    async fn test_bad_password_is_401_detail() {
        let (_tmp, state) = test_state().await;
        let resp = build_router(state)
            .oneshot(json_post(
                "/api/v1/auth/login",
                json!({"password": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["detail"], "Invalid password");
    }

    #[tokio::test]
    async fn test_api_key_missing_and_wrong() {
        let (_tmp, state) = test_state().await;
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/v1/documents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(
                Request::get("/api/v1/documents")
                    .header(API_KEY_HEADER, "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["detail"], "Invalid API key.");
    }

    #[tokio::test]
    async fn test_login_then_list_documents() {
        let (_tmp, state) = test_state().await;
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(json_post(
                "/api/v1/auth/login",
                json!({"password": "hunter22"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let token = body_json(resp).await["token"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = app
            .oneshot(
                Request::get("/api/v1/documents")
                    .header(API_KEY_HEADER, "test-key")
                    .header(USER_TOKEN_HEADER, &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["limit_reached"], false);
    }

    #[tokio::test]
    async fn test_system_info_limits() {
        let (_tmp, state) = test_state().await;
        let resp = build_router(state)
            .oneshot(Request::get("/api/v1/system/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["limits"]["max_documents"], 10);
        assert_eq!(body["limits"]["max_question_length"], 500);
        assert_eq!(body["pricing"]["llm_model"], "gpt-4o-mini");
    }

    async fn login_token(app: &Router) -> String {
        let resp = app
            .clone()
            .oneshot(json_post(
                "/api/v1/auth/login",
                json!({"password": "hunter22"}),
            ))
            .await
            .unwrap();
        body_json(resp).await["token"].as_str().unwrap().to_string()
    }

    fn pdf_upload(token: &str, size: usize) -> Request<Body> {
        let mut body = Vec::with_capacity(size + 256);
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.pdf\"\r\nContent-Type: application/pdf\r\n\r\n",
        );
        body.extend(std::iter::repeat(b'a').take(size));
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");
        Request::builder()
            .method("POST")
            .uri("/api/v1/documents")
            .header(API_KEY_HEADER, "test-key")
            .header(USER_TOKEN_HEADER, token)
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
            .header("content-length", body.len())
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_oversized_upload_reports_file_size() {
        let (_tmp, state) = state_with(|c| c.limits.max_file_size_mb = 1).await;
        let app = build_router(state);
        let token = login_token(&app).await;

        let resp = app
            .clone()
            .oneshot(pdf_upload(&token, 3 * 1024 * 1024))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await["detail"],
            "File too large (3.0MB). Maximum: 1MB"
        );

        // Past the request body limit the size comes from Content-Length.
        let resp = app.oneshot(pdf_upload(&token, 8 * 1024 * 1024)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let detail = body_json(resp).await["detail"].as_str().unwrap().to_string();
        assert!(detail.starts_with("File too large (8.0MB)"), "{}", detail);
        assert!(detail.ends_with("Maximum: 1MB"));
    }

    #[test]
    fn test_insufficient_evidence_detail_is_object() {
        let err = AppError::from(QueryError::InsufficientEvidence(
            crate::models::InsufficientEvidence {
                message: "Unable".into(),
                reason: "no_relevant_chunks".into(),
                suggestions: vec![],
                partial_context: vec![],
            },
        ));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.detail["reason"], "no_relevant_chunks");
    }
}
