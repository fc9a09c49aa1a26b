// src/db/audit_repo.rs

use sqlx::PgPool;

use crate::{common::error::AppError, services::audit::AuditEvent};

#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (org_id, user_id, action, entity_type, entity_id, ip_address, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.org_id)
        .bind(event.actor)
        .bind(&event.action)
        .bind(&event.entity_type)
        .bind(event.entity_id)
        .bind(event.ip_address.as_deref())
        .bind(&event.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
