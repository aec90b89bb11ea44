//! Question answering over the caller's documents.
//!
//! `run_query` checks the daily limits, embeds the question, retrieves the
//! closest chunks, generates a grounded answer, and records the spend.
//! Refusals carry the retrieved passages so the client can still show what
//! was found.

use sqlx::SqlitePool;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::llm;
use crate::models::{
    Citation, Confidence, InsufficientEvidence, QueryRequest, QueryResponse, QueryTiming,
    QueryUsage,
};
use crate::store::{self, SearchHit};
use crate::usage::CostTracker;

pub const MIN_QUESTION_CHARS: usize = 10;
pub const DEFAULT_MAX_CITATIONS: usize = 5;
pub const MAX_CITATIONS: usize = 10;
const SNIPPET_CHARS: usize = 500;

const UNANSWERABLE: &str = "Unable to answer this question based on available documents.";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    LimitExceeded(String),
    #[error("No documents uploaded. Please upload a PDF document first.")]
    NoDocuments,
    #[error("{}", .0.message)]
    InsufficientEvidence(InsufficientEvidence),
    #[error("Upstream model error: {0}")]
    Upstream(anyhow::Error),
    #[error("Storage error: {0}")]
    Storage(anyhow::Error),
}

fn validate(req: &QueryRequest, max_question_length: usize) -> Result<usize, QueryError> {
    let len = req.question.trim().chars().count();
    if len < MIN_QUESTION_CHARS {
        return Err(QueryError::Validation(format!(
            "Question must be at least {} characters",
            MIN_QUESTION_CHARS
        )));
    }
    if len > max_question_length {
        return Err(QueryError::Validation(format!(
            "Question must be at most {} characters",
            max_question_length
        )));
    }

    let max_citations = req.max_citations.unwrap_or(DEFAULT_MAX_CITATIONS);
    if !(1..=MAX_CITATIONS).contains(&max_citations) {
        return Err(QueryError::Validation(format!(
            "max_citations must be between 1 and {}",
            MAX_CITATIONS
        )));
    }
    Ok(max_citations)
}

fn to_citation(hit: &SearchHit) -> Citation {
    Citation {
        document_id: hit.document_id.clone(),
        document_title: hit.document_title.clone(),
        page_number: hit.page_number,
        section_title: hit.section_title.clone(),
        text_snippet: hit.text.chars().take(SNIPPET_CHARS).collect(),
        relevance_score: hit.score,
    }
}

pub fn warning_for(confidence: Confidence) -> Option<String> {
    match confidence {
        Confidence::High => None,
        Confidence::Medium => {
            Some("Some parts of this answer may require additional verification.".to_string())
        }
        Confidence::Low => Some(
            "The answer has low confidence. Please verify with the source documents.".to_string(),
        ),
    }
}

fn ms_since(t: Instant) -> u64 {
    t.elapsed().as_millis() as u64
}

pub async fn run_query(
    pool: &SqlitePool,
    config: &Config,
    tracker: &CostTracker,
    embedder: &dyn EmbeddingProvider,
    user_id: &str,
    req: QueryRequest,
) -> Result<QueryResponse, QueryError> {
    let max_citations = validate(&req, config.limits.max_question_length)?;

    if let Err(message) = tracker.check_limits().await.map_err(QueryError::Storage)? {
        return Err(QueryError::LimitExceeded(message));
    }

    let total_start = Instant::now();

    let doc_count = store::count_documents(pool, Some(user_id))
        .await
        .map_err(QueryError::Storage)?;
    if doc_count == 0 {
        return Err(QueryError::NoDocuments);
    }

    let embed_start = Instant::now();
    let query_vec = embedding::embed_query(embedder, &config.embedding, &req.question)
        .await
        .map_err(QueryError::Upstream)?;
    let embedding_ms = ms_since(embed_start);

    let search_start = Instant::now();
    let hits = store::search(
        pool,
        user_id,
        &query_vec,
        max_citations,
        req.document_ids.as_deref(),
        config.retrieval.min_relevance_score,
    )
    .await
    .map_err(QueryError::Storage)?;
    let search_ms = ms_since(search_start);

    if hits.is_empty() {
        return Err(QueryError::InsufficientEvidence(InsufficientEvidence {
            message: UNANSWERABLE.to_string(),
            reason: "no_relevant_chunks".to_string(),
            suggestions: vec![
                "Try rephrasing your question".to_string(),
                "Ensure the documents contain information about this topic".to_string(),
                "Ask about topics covered in the uploaded documents".to_string(),
            ],
            partial_context: Vec::new(),
        }));
    }

    let citations: Vec<Citation> = hits.iter().map(to_citation).collect();

    let llm_start = Instant::now();
    let answer = llm::generate_answer(&config.llm, &req.question, &hits)
        .await
        .map_err(QueryError::Upstream)?;
    let llm_ms = ms_since(llm_start);
    let total_ms = ms_since(total_start);

    tracker
        .track_query(answer.input_tokens, answer.output_tokens, answer.cost_usd)
        .await
        .map_err(QueryError::Storage)?;

    if answer.confidence == Confidence::Low && llm::admits_insufficient(&answer.text) {
        debug!("answer refused for low confidence");
        return Err(QueryError::InsufficientEvidence(InsufficientEvidence {
            message: UNANSWERABLE.to_string(),
            reason: "low_confidence".to_string(),
            suggestions: vec![
                "The documents may not contain information about this specific topic".to_string(),
                "Try asking a more specific question".to_string(),
                "Check if the relevant document is uploaded".to_string(),
            ],
            partial_context: citations,
        }));
    }

    let retrieval_tokens: i64 = hits.iter().map(|h| h.token_count).sum();
    info!(
        citations = citations.len(),
        confidence = %answer.confidence,
        cost_usd = answer.cost_usd,
        total_ms,
        "query answered"
    );

    Ok(QueryResponse {
        warning: warning_for(answer.confidence),
        answer: answer.text,
        citations,
        confidence: answer.confidence,
        usage: QueryUsage {
            retrieval_tokens,
            llm_input_tokens: answer.input_tokens,
            llm_output_tokens: answer.output_tokens,
            estimated_cost_usd: answer.cost_usd,
            timing: Some(QueryTiming {
                embedding_ms,
                search_ms,
                llm_ms,
                total_ms,
            }),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_length_bounds() {
        assert!(matches!(
            validate(&QueryRequest::new("  short   "), 500),
            Err(QueryError::Validation(_))
        ));
        assert_eq!(validate(&QueryRequest::new("0123456789"), 500).unwrap(), 5);
        let long = "a".repeat(501);
        assert!(validate(&QueryRequest::new(long), 500).is_err());
    }

    #[test]
    fn test_max_citations_bounds() {
        let mut req = QueryRequest::new("What is the termination clause?");
        req.max_citations = Some(0);
        assert!(validate(&req, 500).is_err());
        req.max_citations = Some(11);
        assert!(validate(&req, 500).is_err());
        req.max_citations = Some(10);
        assert_eq!(validate(&req, 500).unwrap(), 10);
    }

    #[test]
    fn test_warnings_by_confidence() {
        assert!(warning_for(Confidence::High).is_none());
        assert!(warning_for(Confidence::Medium)
            .unwrap()
            .contains("additional verification"));
        assert!(warning_for(Confidence::Low).unwrap().contains("low confidence"));
    }

    #[test]
    fn test_citation_snippet_truncated() {
        let hit = SearchHit {
            chunk_id: "c".into(),
            document_id: "d".into(),
            document_title: "Lease".into(),
            page_number: 4,
            section_title: Some("Rent".into()),
            text: "é".repeat(600),
            token_count: 150,
            score: 0.7,
        };
        let c = to_citation(&hit);
        assert_eq!(c.text_snippet.chars().count(), 500);
        assert_eq!(c.page_number, 4);
        assert_eq!(c.relevance_score, 0.7);
    }
}
