//! pgvector-backed memory store with a write-ahead outbox.
//!
//! Writers follow the outbox protocol: a pending row is inserted before the
//! embedding call, deleted after a successful vector insert, and updated
//! with the failure otherwise. A periodic sweeper drains leftovers, so a
//! memory write never blocks (or loses) a generation turn.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reverie_core::config::EMBEDDING_DIM;
use reverie_embedding::vector::format_vector_literal;
use reverie_embedding::Embedder;

use crate::error::{MemoryError, Result};
use crate::types::{CanonScope, MemoryQuery, NewMemory, PendingMemory, RetrievedMemory};

pub struct MemoryStore {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
}

impl MemoryStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }

    /// Embed `content` and insert a memory row. The embedding is written
    /// once and never updated.
    pub async fn add_memory(&self, new: &NewMemory) -> Result<Uuid> {
        new.validate().map_err(MemoryError::Invalid)?;

        let embedding = self
            .embedder
            .embed(&new.content)
            .await
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("embed returned none".to_string()))?;
        if embedding.len() != EMBEDDING_DIM {
            return Err(MemoryError::Invalid(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                embedding.len()
            )));
        }

        let id = Uuid::new_v4();
        let (chunk_group, chunk_index, total_chunks) = match &new.chunk {
            Some(c) => (Some(c.group_id.clone()), Some(c.index), Some(c.total)),
            None => (None, None, None),
        };

        sqlx::query(
            "INSERT INTO memories
             (id, persona_id, personality_id, content, embedding, canon_scope,
              summary_type, channel_id, guild_id, session_id, senders,
              message_ids, chunk_group_id, chunk_index, total_chunks, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
        )
        .bind(id)
        .bind(&new.persona_id)
        .bind(&new.personality_id)
        .bind(&new.content)
        .bind(Vector::from(embedding))
        .bind(new.canon_scope.to_string())
        .bind(&new.summary_type)
        .bind(&new.channel_id)
        .bind(&new.guild_id)
        .bind(&new.session_id)
        .bind(serde_json::json!(new.senders))
        .bind(serde_json::json!(new.message_ids))
        .bind(chunk_group)
        .bind(chunk_index)
        .bind(total_chunks)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(memory_id = %id, scope = %new.canon_scope, "memory inserted");
        Ok(id)
    }

    /// Full outbox write: pending row first, vector insert, pending delete.
    /// On failure the pending row survives with attempts/last_error updated
    /// and the error is returned for the caller to log.
    pub async fn remember(&self, new: &NewMemory) -> Result<Uuid> {
        let pending_id = self.insert_pending(new).await?;
        match self.add_memory(new).await {
            Ok(memory_id) => {
                self.delete_pending(pending_id).await?;
                Ok(memory_id)
            }
            Err(e) => {
                self.mark_pending_failed(pending_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Similarity query over pgvector cosine distance.
    ///
    /// Degrades to an empty result when the embedder is down — retrieval
    /// loss is preferable to failing the surrounding generation.
    pub async fn query(&self, text: &str, opts: &MemoryQuery) -> Result<Vec<RetrievedMemory>> {
        if opts.scopes.is_empty() {
            return Ok(Vec::new());
        }

        let Some(embedding) = self.embedder.embed(text).await else {
            warn!("memory query degraded: embedder unavailable");
            return Ok(Vec::new());
        };
        let literal = format_vector_literal(&embedding)
            .map_err(|e| MemoryError::Invalid(e.to_string()))?;

        let mut qb = build_memory_query(&literal, opts);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let memories = rows
            .iter()
            .filter_map(|row| row_to_retrieved(row).ok())
            .collect();
        Ok(memories)
    }

    /// ID-based hard delete of one session's canon.
    pub async fn delete_session_memories(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM memories WHERE canon_scope = 'session' AND session_id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        info!(session_id, deleted = result.rows_affected(), "session memories deleted");
        Ok(result.rows_affected())
    }

    // ── pending-memory outbox ─────────────────────────────────────────────────

    pub async fn insert_pending(&self, new: &NewMemory) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO pending_memories (id, payload, attempts, created_at)
             VALUES ($1, $2, 0, $3)",
        )
        .bind(id)
        .bind(serde_json::to_value(new).map_err(|e| MemoryError::Invalid(e.to_string()))?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn delete_pending(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pending_memories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_pending_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE pending_memories
             SET attempts = attempts + 1, last_attempt_at = $2, last_error = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_pending(&self, limit: i64) -> Result<Vec<PendingMemory>> {
        let rows = sqlx::query(
            "SELECT id, payload, attempts, last_attempt_at, last_error, created_at
             FROM pending_memories ORDER BY created_at LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let pending = rows
            .iter()
            .filter_map(|row| {
                let payload: serde_json::Value = row.try_get("payload").ok()?;
                let payload: NewMemory = serde_json::from_value(payload).ok()?;
                Some(PendingMemory {
                    id: row.try_get("id").ok()?,
                    payload,
                    attempts: row.try_get("attempts").ok()?,
                    last_attempt_at: row.try_get("last_attempt_at").ok()?,
                    last_error: row.try_get("last_error").ok()?,
                    created_at: row.try_get("created_at").ok()?,
                })
            })
            .collect();
        Ok(pending)
    }

    /// One sweep of the outbox: re-attempt each pending row, delete on
    /// success, bump attempts on failure. Returns (drained, still_pending).
    pub async fn drain_pending(&self, limit: i64) -> Result<(usize, usize)> {
        let pending = self.list_pending(limit).await?;
        let mut drained = 0usize;
        let mut remaining = 0usize;

        for row in &pending {
            match self.add_memory(&row.payload).await {
                Ok(_) => {
                    self.delete_pending(row.id).await?;
                    drained += 1;
                }
                Err(e) => {
                    warn!(pending_id = %row.id, attempts = row.attempts + 1, err = %e,
                          "pending memory retry failed");
                    self.mark_pending_failed(row.id, &e.to_string()).await?;
                    remaining += 1;
                }
            }
        }

        if drained > 0 {
            info!(drained, remaining, "pending-memory outbox drained");
        }
        Ok((drained, remaining))
    }
}

/// Periodic outbox drain. Runs until `shutdown` broadcasts `true`.
pub async fn run_outbox_sweeper(
    store: Arc<MemoryStore>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "pending-memory sweeper started");
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = store.drain_pending(100).await {
                    warn!(err = %e, "outbox sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("pending-memory sweeper shutting down");
                    break;
                }
            }
        }
    }
}

/// Assemble the similarity query. Split out so the generated SQL shape is
/// testable without a live database.
fn build_memory_query<'a>(
    vector_literal: &'a str,
    opts: &'a MemoryQuery,
) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT m.id, m.persona_id, m.personality_id, m.content, m.canon_scope,
                m.summary_type, m.channel_id, m.session_id, m.created_at,
                1 - (m.embedding <=> ",
    );
    qb.push_bind(vector_literal);
    qb.push(
        "::vector) AS similarity,
                p.name AS persona_name, pe.name AS personality_name
         FROM memories m
         LEFT JOIN personas p ON p.id = m.persona_id
         LEFT JOIN personalities pe ON pe.id = m.personality_id
         WHERE (m.embedding <=> ",
    );
    qb.push_bind(vector_literal);
    qb.push("::vector) < ");
    // Distance threshold is the complement of the similarity threshold.
    qb.push_bind(1.0 - opts.score_threshold);

    // Scope filter: global is open; personal must match the requesting
    // persona; session must match the active session.
    qb.push(" AND (");
    let mut first = true;
    for scope in &opts.scopes {
        if !first {
            qb.push(" OR ");
        }
        first = false;
        match scope {
            CanonScope::Global => {
                qb.push("m.canon_scope = 'global'");
            }
            CanonScope::Personal => {
                qb.push("(m.canon_scope = 'personal' AND m.persona_id = ");
                qb.push_bind(&opts.persona_id);
                qb.push(")");
            }
            CanonScope::Session => {
                qb.push("(m.canon_scope = 'session' AND m.session_id = ");
                qb.push_bind(opts.session_id.as_deref().unwrap_or(""));
                qb.push(")");
            }
        }
    }
    qb.push(")");

    if let Some(ref personality_id) = opts.personality_id {
        qb.push(" AND m.personality_id = ");
        qb.push_bind(personality_id);
    }
    if let Some(horizon) = opts.exclude_newer_than {
        qb.push(" AND m.created_at <= ");
        qb.push_bind(horizon);
    }
    if !opts.exclude_ids.is_empty() {
        qb.push(" AND m.id <> ALL(");
        qb.push_bind(&opts.exclude_ids);
        qb.push(")");
    }
    if !opts.channel_ids.is_empty() {
        qb.push(" AND m.channel_id = ANY(");
        qb.push_bind(&opts.channel_ids);
        qb.push(")");
    }

    qb.push(" ORDER BY m.embedding <=> ");
    qb.push_bind(vector_literal);
    qb.push("::vector ASC LIMIT ");
    qb.push_bind(opts.limit as i64);

    qb
}

fn row_to_retrieved(row: &PgRow) -> std::result::Result<RetrievedMemory, sqlx::Error> {
    let scope_str: String = row.try_get("canon_scope")?;
    Ok(RetrievedMemory {
        id: row.try_get("id")?,
        persona_id: row.try_get("persona_id")?,
        personality_id: row.try_get("personality_id")?,
        content: row.try_get("content")?,
        canon_scope: scope_str.parse().unwrap_or(CanonScope::Global),
        summary_type: row.try_get("summary_type")?,
        channel_id: row.try_get("channel_id")?,
        session_id: row.try_get("session_id")?,
        created_at: row.try_get("created_at")?,
        similarity: row.try_get("similarity")?,
        persona_name: row.try_get("persona_name")?,
        personality_name: row.try_get("personality_name")?,
    })
}
