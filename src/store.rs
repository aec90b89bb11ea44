//! SQLite persistence for documents, chunks, and their embedding vectors.
//!
//! Every read and delete is scoped to the owning `user_id`; a document that
//! belongs to someone else behaves exactly like one that does not exist.
//! Similarity search loads the caller's vectors and ranks them by cosine
//! similarity in Rust.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkSummary, DocumentDetailResponse, DocumentSummary, ProcessedDocument};

const PREVIEW_CHARS: usize = 100;

/// A chunk returned by [`search`], with its clamped similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page_number: i64,
    pub section_title: Option<String>,
    pub text: String,
    pub token_count: i64,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f64,
}

fn to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// Inserts a processed document, its chunks, and one vector per chunk in a
/// single transaction.
pub async fn insert_document(
    pool: &SqlitePool,
    user_id: &str,
    doc: &ProcessedDocument,
    vectors: &[Vec<f32>],
    model: &str,
) -> Result<()> {
    if vectors.len() != doc.chunks.len() {
        anyhow::bail!(
            "expected {} vectors, got {}",
            doc.chunks.len(),
            vectors.len()
        );
    }

    let sections_json = serde_json::to_string(&doc.sections)?;
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, user_id, title, filename, page_count, file_size_bytes, sections_json, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(user_id)
    .bind(&doc.title)
    .bind(&doc.filename)
    .bind(doc.page_count)
    .bind(doc.file_size_bytes)
    .bind(&sections_json)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (chunk, vector) in doc.chunks.iter().zip(vectors) {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, page_number, section_title, text, token_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.page_number)
        .bind(&chunk.section_title)
        .bind(&chunk.text)
        .bind(chunk.token_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// The caller's documents, newest first.
pub async fn list_documents(pool: &SqlitePool, user_id: &str) -> Result<Vec<DocumentSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.page_count, d.file_size_bytes, d.uploaded_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
        FROM documents d
        WHERE d.user_id = ?
        ORDER BY d.uploaded_at DESC, d.id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentSummary {
            id: row.get("id"),
            title: row.get("title"),
            page_count: row.get("page_count"),
            chunk_count: row.get("chunk_count"),
            file_size_bytes: row.get("file_size_bytes"),
            uploaded_at: to_datetime(row.get("uploaded_at")),
        })
        .collect())
}

/// Number of stored documents, for one user or for everyone.
pub async fn count_documents(pool: &SqlitePool, user_id: Option<&str>) -> Result<i64> {
    let count: i64 = match user_id {
        Some(uid) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = ?")
                .bind(uid)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM documents")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub async fn get_document(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
) -> Result<Option<DocumentDetailResponse>> {
    let row = sqlx::query(
        "SELECT id, title, page_count, sections_json, uploaded_at FROM documents WHERE id = ? AND user_id = ?",
    )
    .bind(document_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let chunk_rows = sqlx::query(
        r#"
        SELECT id, page_number, section_title, token_count, text
        FROM chunks
        WHERE document_id = ?
        ORDER BY chunk_index ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    let chunks = chunk_rows
        .iter()
        .map(|r| {
            let text: String = r.get("text");
            ChunkSummary {
                chunk_id: r.get("id"),
                page_number: r.get("page_number"),
                section_title: r.get("section_title"),
                token_count: r.get("token_count"),
                preview: preview(&text),
            }
        })
        .collect();

    let sections_json: String = row.get("sections_json");
    let sections: Vec<String> = serde_json::from_str(&sections_json).unwrap_or_default();

    Ok(Some(DocumentDetailResponse {
        id: row.get("id"),
        title: row.get("title"),
        page_count: row.get("page_count"),
        chunks,
        sections,
        uploaded_at: to_datetime(row.get("uploaded_at")),
    }))
}

/// Deletes a document with its chunks and vectors. Returns the number of
/// chunks removed, or `None` when the caller owns no such document.
pub async fn delete_document(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;

    let exists: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE id = ? AND user_id = ?")
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Ok(None);
    }

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    let removed = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(removed as i64))
}

/// Ranks the caller's chunks against `query_vec`.
///
/// Hits scoring below `min_score` are dropped; at most `limit` are
/// returned, best first. `document_ids` narrows the search when given.
pub async fn search(
    pool: &SqlitePool,
    user_id: &str,
    query_vec: &[f32],
    limit: usize,
    document_ids: Option<&[String]>,
    min_score: f64,
) -> Result<Vec<SearchHit>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT c.id AS chunk_id, c.document_id, d.title AS document_title,
               c.page_number, c.section_title, c.text, c.token_count, cv.embedding
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = c.document_id
        WHERE d.user_id =
        "#,
    );
    qb.push_bind(user_id.to_string());

    if let Some(ids) = document_ids.filter(|ids| !ids.is_empty()) {
        qb.push(" AND c.document_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        sep.push_unseparated(")");
    }

    let rows = qb.build().fetch_all(pool).await?;

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .filter_map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let score = (cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64).clamp(0.0, 1.0);
            if score < min_score {
                return None;
            }
            Some(SearchHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                document_title: row.get("document_title"),
                page_number: row.get("page_number"),
                section_title: row.get("section_title"),
                text: row.get("text"),
                token_count: row.get("token_count"),
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);

    Ok(hits)
}

/// True when the database answers a trivial query.
pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
