// src/services/sequence_service.rs

use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::SequenceRepository,
    models::sequences::DocumentType,
    services::tenant_router::TenantRouter,
};

#[derive(Clone)]
pub struct SequenceService {
    router: TenantRouter,
    sequence_repo: SequenceRepository,
}

impl SequenceService {
    pub fn new(router: TenantRouter, sequence_repo: SequenceRepository) -> Self {
        Self { router, sequence_repo }
    }

    /// Próximo número do documento, no schema da organização.
    pub async fn next_document_number(&self, org_id: Uuid, document_type: DocumentType) -> Result<String, AppError> {
        // 1. Conexão do tenant
        let tenant = self.router.resolve(org_id).await?;

        // 2. Lê-ou-cria e incrementa numa transação
        let mut tx = tenant.pool.begin().await?;
        let (prefix, number) = self
            .sequence_repo
            .increment(&mut *tx, org_id, document_type)
            .await?;
        tx.commit().await?;

        let formatted = format_document_number(&prefix, Utc::now().year(), number);
        tracing::debug!(%org_id, schema = %tenant.schema, number = %formatted, "número de documento emitido");
        Ok(formatted)
    }
}

/// `{PREFIXO}-{ANO}-{n:05}`, ex.: `F-2026-00042`.
pub fn format_document_number(prefix: &str, year: i32, number: i32) -> String {
    format!("{}-{}-{:05}", prefix, year, number)
}
