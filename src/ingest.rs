//! Upload pipeline: validate → extract → chunk → embed → store.
//!
//! Runs once per uploaded PDF. Nothing is written until every chunk has a
//! vector, so a failed upload leaves no partial document behind.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::extract::{extract_checked, validate_upload, ExtractError, PageExtractor};
use crate::models::{DocumentUploadResponse, ProcessedDocument};
use crate::store;

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Document limit reached ({0}). Delete a document first.")]
    LimitReached(usize),
    #[error(transparent)]
    Invalid(#[from] ExtractError),
    #[error("No extractable text found in PDF")]
    NoText,
    #[error("Failed to embed document: {0}")]
    Embedding(anyhow::Error),
    #[error("Failed to store document: {0}")]
    Storage(anyhow::Error),
}

/// Title used when the client supplies none: the filename without its
/// `.pdf` extension, underscores read as spaces.
pub fn default_title(filename: &str) -> String {
    let stem = if filename.to_ascii_lowercase().ends_with(".pdf") {
        &filename[..filename.len() - 4]
    } else {
        filename
    };
    stem.replace('_', " ")
}

pub async fn ingest_upload(
    pool: &SqlitePool,
    config: &Config,
    extractor: Arc<dyn PageExtractor>,
    embedder: &dyn EmbeddingProvider,
    user_id: &str,
    upload: Upload,
) -> Result<DocumentUploadResponse, IngestError> {
    let max_documents = config.limits.max_documents;
    let current = store::count_documents(pool, Some(user_id))
        .await
        .map_err(IngestError::Storage)?;
    if current as usize >= max_documents {
        return Err(IngestError::LimitReached(max_documents));
    }

    validate_upload(
        &upload.filename,
        upload.bytes.len(),
        config.limits.max_file_size_mb,
    )?;

    let started = Instant::now();
    let file_size_bytes = upload.bytes.len() as i64;
    let max_pages = config.limits.max_pages_per_document;
    let bytes = upload.bytes;
    let pages = tokio::task::spawn_blocking(move || {
        extract_checked(extractor.as_ref(), &bytes, max_pages)
    })
    .await
    .map_err(|e| ExtractError::Pdf(e.to_string()))??;

    let document_id = Uuid::new_v4().to_string();
    let title = upload
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_title(&upload.filename));

    let (chunks, sections) = chunk_pages(&document_id, &pages, &config.chunking);
    if chunks.is_empty() {
        return Err(IngestError::NoText);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedding::embed_texts(embedder, &config.embedding, &texts)
        .await
        .map_err(IngestError::Embedding)?;

    let doc = ProcessedDocument {
        id: document_id,
        title,
        filename: upload.filename,
        page_count: pages.len() as i64,
        chunks,
        sections,
        file_size_bytes,
    };
    store::insert_document(pool, user_id, &doc, &vectors, embedder.model_name())
        .await
        .map_err(IngestError::Storage)?;

    let chunk_count = doc.chunks.len() as i64;
    info!(
        document_id = %doc.id,
        pages = doc.page_count,
        chunks = chunk_count,
        "document ingested"
    );

    Ok(DocumentUploadResponse {
        id: doc.id,
        title: doc.title,
        page_count: doc.page_count,
        chunk_count,
        sections_detected: doc.sections,
        processing_time_ms: started.elapsed().as_millis() as u64,
        message: format!(
            "Document processed successfully. Created {} searchable chunks.",
            chunk_count
        ),
    })
}
