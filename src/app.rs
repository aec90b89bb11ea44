//! Client application context.
//!
//! [`AppContext`] owns the configuration, session, API client, and cache,
//! and is passed explicitly to every command. Built once at startup,
//! reset on logout, revalidated on start.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::DataCache;
use crate::chat::{validate_question, ChatMessage, Transcript, ValidationError};
use crate::client::{ApiClient, ApiError};
use crate::config::{ClientConfig, Config};
use crate::extract::is_pdf_filename;
use crate::models::{
    DeleteResponse, DocumentDetailResponse, DocumentListResponse, DocumentUploadResponse,
    QueryRequest,
};
use crate::session::{FileTokenStore, LoginOutcome, Session, TokenStore};
use crate::status::{self, StatusSnapshot};

/// Where the client lands after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Main,
}

#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Not a PDF; nothing was sent.
    Ignored,
    /// The backend reports the document limit is already reached.
    LimitReached { total: usize },
    Uploaded(DocumentUploadResponse),
}

pub struct AppContext {
    pub config: ClientConfig,
    pub session: Arc<Session>,
    pub client: Arc<ApiClient>,
    pub cache: Arc<DataCache>,
}

impl AppContext {
    pub fn new(config: ClientConfig, store: Box<dyn TokenStore>) -> Result<Self> {
        let session = Arc::new(Session::new(store));
        let client = Arc::new(ApiClient::new(&config, session.clone())?);
        let cache = Arc::new(DataCache::new(client.clone()));
        Ok(Self {
            config,
            session,
            client,
            cache,
        })
    }

    /// Context persisting the session token at `[client] session_file`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = FileTokenStore::new(config.client.session_path());
        Self::new(config.client.clone(), Box::new(store))
    }

    /// Revalidates a stored token and picks the first screen.
    pub async fn start(&self) -> Screen {
        if self.session.restore(&self.client).await {
            Screen::Main
        } else {
            Screen::Login
        }
    }

    pub async fn login(
        &self,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, ApiError> {
        let outcome = self.session.login(&self.client, password, cancel).await?;
        self.cache.invalidate_all().await;
        Ok(outcome)
    }

    pub async fn logout(&self) {
        self.session.logout(&self.client).await;
        self.cache.invalidate_all().await;
        info!("logged out");
    }

    pub async fn documents(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DocumentListResponse, ApiError> {
        self.cache.documents(cancel).await
    }

    pub async fn document(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentDetailResponse, ApiError> {
        self.client.get_document(id, cancel).await
    }

    /// Uploads a PDF. Paths without a `.pdf` extension are ignored without
    /// touching the network; a full document list refuses the upload.
    pub async fn upload(
        &self,
        path: &Path,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ApiError> {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if is_pdf_filename(name) => name.to_string(),
            _ => return Ok(UploadOutcome::Ignored),
        };

        let list = self.cache.documents(cancel).await?;
        if list.limit_reached {
            return Ok(UploadOutcome::LimitReached { total: list.total });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Storage(format!("{}: {}", path.display(), e)))?;
        let resp = self
            .client
            .upload_document(&filename, bytes, title, cancel)
            .await?;
        self.cache.on_documents_changed().await;
        Ok(UploadOutcome::Uploaded(resp))
    }

    pub async fn delete(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeleteResponse, ApiError> {
        let resp = self.client.delete_document(id, cancel).await?;
        self.cache.on_documents_changed().await;
        Ok(resp)
    }

    /// Runs one chat exchange. An invalid question is rejected before any
    /// request and leaves the transcript untouched; otherwise a user message
    /// and its answer (or error) are appended.
    pub async fn ask(
        &self,
        transcript: &mut Transcript,
        question: &str,
        document_ids: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let question = validate_question(question)?;
        transcript.push(ChatMessage::user(question.clone()));

        let req = QueryRequest {
            document_ids,
            ..QueryRequest::new(question)
        };
        let reply = match self.client.query(&req, cancel).await {
            Ok(resp) => ChatMessage::from_response(resp),
            Err(e) => ChatMessage::from_error(&e),
        };
        transcript.push(reply);
        self.cache.on_query().await;
        Ok(())
    }

    pub async fn status(&self, cancel: &CancellationToken) -> StatusSnapshot {
        status::snapshot_now(&self.cache, cancel).await
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_authenticated()
    }
}
