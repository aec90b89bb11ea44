//! Typed HTTP client for the REST API.
//!
//! Every request carries `X-API-Key` and, while logged in, `X-User-Token`.
//! A 401 from a document or query route expires the shared [`Session`].
//! Error bodies are normalized by [`error_message`]; a 422 carrying a
//! structured refusal becomes [`ApiError::InsufficientEvidence`].
//!
//! Each call takes a [`CancellationToken`]. Cancelling it abandons the
//! request immediately with [`ApiError::Cancelled`]. There is no retry.

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::{API_KEY_HEADER, USER_TOKEN_HEADER};
use crate::config::ClientConfig;
use crate::extract::MIME_PDF;
use crate::models::{
    DeleteResponse, DocumentDetailResponse, DocumentListResponse, DocumentUploadResponse,
    HealthResponse, InsufficientEvidence, LoginRequest, LoginResponse, QueryRequest,
    QueryResponse, ReadinessResponse, StatusMessage, SystemInfoResponse, TokenRequest,
    UsageResponse, ValidateResponse,
};
use crate::session::Session;

pub const GENERIC_ERROR: &str = "An unexpected error occurred";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{}", .0.message)]
    InsufficientEvidence(InsufficientEvidence),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Local storage error: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::InsufficientEvidence(_) => Some(422),
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Extracts a human-readable message from an error body: `detail` when it
/// is a string, `detail.message` when it is an object, otherwise a generic
/// fallback.
pub fn error_message(body: &serde_json::Value) -> String {
    match body.get("detail") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Object(obj)) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_ERROR.to_string()),
        _ => GENERIC_ERROR.to_string(),
    }
}

/// Whether a 401 on `path` means the session token is no longer valid.
pub fn is_protected(path: &str) -> bool {
    path == "/query" || path == "/documents" || path.starts_with("/documents/")
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<Session>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(token) = self.session.token() {
            req = req.header(USER_TOKEN_HEADER, token);
        }
        req
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let exchange = async {
            let resp = req
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            let status = resp.status();
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;

            if status.is_success() {
                return serde_json::from_slice::<T>(&bytes)
                    .map_err(|e| ApiError::Decode(e.to_string()));
            }
            Err(self.classify(status, &bytes, path))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = exchange => result,
        }
    }

    fn classify(&self, status: StatusCode, bytes: &[u8], path: &str) -> ApiError {
        let body: serde_json::Value = serde_json::from_slice(bytes).unwrap_or_default();
        let message = error_message(&body);
        debug!(status = status.as_u16(), path, %message, "api error");

        if status == StatusCode::UNAUTHORIZED {
            if is_protected(path) {
                self.session.expire();
            }
            return ApiError::Unauthorized(message);
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(detail) = body.get("detail").filter(|d| d.get("reason").is_some()) {
                if let Ok(ev) = serde_json::from_value::<InsufficientEvidence>(detail.clone()) {
                    return ApiError::InsufficientEvidence(ev);
                }
            }
        }

        ApiError::Api {
            status: status.as_u16(),
            message,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, path), path, cancel).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::POST, path).json(body), path, cancel)
            .await
    }

    // ============ Auth ============

    pub async fn login(
        &self,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginResponse, ApiError> {
        self.post_json(
            "/auth/login",
            &LoginRequest {
                password: password.to_string(),
            },
            cancel,
        )
        .await
    }

    pub async fn validate_token(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ApiError> {
        let resp: ValidateResponse = self
            .post_json(
                "/auth/validate",
                &TokenRequest {
                    token: token.to_string(),
                },
                cancel,
            )
            .await?;
        Ok(resp.valid)
    }

    pub async fn logout(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusMessage, ApiError> {
        self.post_json(
            "/auth/logout",
            &TokenRequest {
                token: token.to_string(),
            },
            cancel,
        )
        .await
    }

    // ============ Documents ============

    pub async fn list_documents(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DocumentListResponse, ApiError> {
        self.get_json("/documents", cancel).await
    }

    pub async fn upload_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DocumentUploadResponse, ApiError> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(MIME_PDF)
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let mut form = Form::new().part("file", part);
        if let Some(t) = title {
            form = form.text("title", t.to_string());
        }
        let path = "/documents";
        self.send(self.request(Method::POST, path).multipart(form), path, cancel)
            .await
    }

    pub async fn get_document(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentDetailResponse, ApiError> {
        self.get_json(&format!("/documents/{}", id), cancel).await
    }

    pub async fn delete_document(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeleteResponse, ApiError> {
        let path = format!("/documents/{}", id);
        self.send(self.request(Method::DELETE, &path), &path, cancel)
            .await
    }

    // ============ Query ============

    pub async fn query(
        &self,
        req: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, ApiError> {
        self.post_json("/query", req, cancel).await
    }

    // ============ System ============

    pub async fn system_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SystemInfoResponse, ApiError> {
        self.get_json("/system/info", cancel).await
    }

    pub async fn usage(&self, cancel: &CancellationToken) -> Result<UsageResponse, ApiError> {
        self.get_json("/system/usage", cancel).await
    }

    pub async fn health(&self, cancel: &CancellationToken) -> Result<HealthResponse, ApiError> {
        self.get_json("/health", cancel).await
    }

    pub async fn readiness(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReadinessResponse, ApiError> {
        self.get_json("/health/ready", cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_string_detail() {
        assert_eq!(error_message(&json!({"detail": "Invalid API key."})), "Invalid API key.");
    }

    #[test]
    fn test_error_message_object_detail() {
        let body = json!({"detail": {"message": "Unable to answer", "reason": "low_confidence"}});
        assert_eq!(error_message(&body), "Unable to answer");
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message(&json!({})), GENERIC_ERROR);
        assert_eq!(error_message(&json!({"detail": [1, 2]})), GENERIC_ERROR);
        assert_eq!(error_message(&serde_json::Value::Null), GENERIC_ERROR);
        assert_eq!(error_message(&json!({"detail": {"reason": "x"}})), GENERIC_ERROR);
    }

    #[test]
    fn test_protected_paths() {
        assert!(is_protected("/documents"));
        assert!(is_protected("/documents/abc"));
        assert!(is_protected("/query"));
        assert!(!is_protected("/auth/login"));
        assert!(!is_protected("/system/usage"));
        assert!(!is_protected("/health/ready"));
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(ApiError::Unauthorized("x".into()).status(), Some(401));
        assert_eq!(ApiError::Cancelled.status(), None);
        let e = ApiError::Api {
            status: 409,
            message: "Document limit reached (10). Delete a document first.".into(),
        };
        assert_eq!(e.status(), Some(409));
        assert_eq!(e.to_string(), "Document limit reached (10). Delete a document first.");
    }
}
