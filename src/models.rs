//! Data types shared by the service and the client.
//!
//! The request/response structs are the JSON wire format of the REST API;
//! both the axum handlers and [`crate::client::ApiClient`] use them, so the
//! two halves cannot drift apart. [`Chunk`] and [`ProcessedDocument`] are
//! internal to the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============ Internal pipeline types ============

/// A chunk of page text ready to be embedded and stored.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `{document_id}_p{page}_c{index_on_page}`.
    pub id: String,
    pub document_id: String,
    /// Position within the whole document, contiguous from 0.
    pub chunk_index: i64,
    /// 1-indexed.
    pub page_number: i64,
    pub section_title: Option<String>,
    pub text: String,
    pub token_count: i64,
}

/// A parsed and chunked upload, before embedding.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub id: String,
    pub title: String,
    pub filename: String,
    pub page_count: i64,
    pub chunks: Vec<Chunk>,
    pub sections: Vec<String>,
    pub file_size_bytes: i64,
}

// ============ Auth ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Body of `/auth/validate` and `/auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub success: bool,
    pub message: String,
}

// ============ Documents ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub page_count: i64,
    pub chunk_count: i64,
    #[serde(default)]
    pub file_size_bytes: Option<i64>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    #[serde(default)]
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
    pub limit_reached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUploadResponse {
    pub id: String,
    pub title: String,
    pub page_count: i64,
    pub chunk_count: i64,
    #[serde(default)]
    pub sections_detected: Vec<String>,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: String,
    pub page_number: i64,
    #[serde(default)]
    pub section_title: Option<String>,
    pub token_count: i64,
    /// First 100 characters, with `...` appended when truncated.
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDetailResponse {
    pub id: String,
    pub title: String,
    pub page_count: i64,
    #[serde(default)]
    pub chunks: Vec<ChunkSummary>,
    #[serde(default)]
    pub sections: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub chunks_removed: i64,
}

// ============ Query ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_citations: Option<usize>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            document_ids: None,
            max_citations: None,
        }
    }
}

/// A retrieved passage offered as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub document_id: String,
    pub document_title: String,
    pub page_number: i64,
    #[serde(default)]
    pub section_title: Option<String>,
    pub text_snippet: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub relevance_score: f64,
}

/// Coarse quality signal attached to a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTiming {
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub llm_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryUsage {
    pub retrieval_tokens: i64,
    pub llm_input_tokens: i64,
    pub llm_output_tokens: i64,
    pub estimated_cost_usd: f64,
    #[serde(default)]
    pub timing: Option<QueryTiming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    pub usage: QueryUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Structured `detail` of a 422 answer refusal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsufficientEvidence {
    pub message: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub partial_context: Vec<Citation>,
}

// ============ System ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLimits {
    pub max_documents: usize,
    pub max_pages_per_document: usize,
    pub max_file_size_mb: usize,
    pub max_question_length: usize,
    pub max_daily_queries: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingInfo {
    pub llm_model: String,
    pub input_token_cost_per_1k: f64,
    pub output_token_cost_per_1k: f64,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfoResponse {
    pub limits: SystemLimits,
    pub pricing: PricingInfo,
    pub version: String,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub period: String,
    pub queries_today: i64,
    #[serde(default)]
    pub total_tokens_used: i64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub documents_stored: i64,
}

// ============ Health ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub vector_store: bool,
    pub embedding_model: bool,
    pub llm_api: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub components: ComponentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_wire_format() {
        let json = serde_json::to_string(&Confidence::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
        let parsed: Confidence = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, Confidence::High);
    }

    #[test]
    fn test_query_request_omits_unset_fields() {
        let body = serde_json::to_value(QueryRequest::new("What is the termination clause?"))
            .unwrap();
        assert_eq!(body["question"], "What is the termination clause?");
        assert!(body.get("document_ids").is_none());
        assert!(body.get("max_citations").is_none());
    }

    #[test]
    fn test_citation_tolerates_missing_optional_fields() {
        let c: Citation = serde_json::from_str(
            r#"{"document_title":"Lease","page_number":3,"text_snippet":"...","relevance_score":0.7}"#,
        )
        .unwrap();
        assert_eq!(c.document_id, "");
        assert!(c.section_title.is_none());
    }
}
