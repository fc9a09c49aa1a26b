// src/db/rate_limit_repo.rs

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::error::AppError;

// Contadores em janela fixa guardados no banco, visíveis para todas as instâncias.
#[derive(Clone)]
pub struct RateLimitRepository {
    pool: PgPool,
}

impl RateLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registra uma requisição para `key` e devolve (contagem na janela, fim da janela).
    /// Janela vencida recomeça em 1. Tudo numa instrução atômica.
    pub async fn hit(&self, key: &str, window_secs: f64) -> Result<(i32, DateTime<Utc>), AppError> {
        let row: (i32, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO rate_limit_buckets (key, count, reset_at)
            VALUES ($1, 1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET
                count = CASE WHEN rate_limit_buckets.reset_at <= now() THEN 1
                             ELSE rate_limit_buckets.count + 1 END,
                reset_at = CASE WHEN rate_limit_buckets.reset_at <= now() THEN EXCLUDED.reset_at
                                ELSE rate_limit_buckets.reset_at END
            RETURNING count, reset_at
            "#,
        )
        .bind(key)
        .bind(window_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Remove janelas vencidas há mais de `grace_secs`.
    pub async fn purge_expired(&self, grace_secs: f64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM rate_limit_buckets WHERE reset_at < now() - make_interval(secs => $1)",
        )
        .bind(grace_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
