// src/db/sequence_repo.rs

use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::sequences::DocumentType};

// Sem pool próprio: a tabela `document_sequences` vive no schema do tenant,
// então o chamador passa a conexão (ou transação) vinda do roteador de tenants.
#[derive(Clone, Default)]
pub struct SequenceRepository;

impl SequenceRepository {
    pub fn new() -> Self {
        Self
    }

    /// Lê-ou-cria o contador e incrementa numa única instrução.
    /// O upsert trava a linha (org, tipo): dois chamadores nunca recebem o mesmo número.
    pub async fn increment<'e, E>(
        &self,
        executor: E,
        org_id: Uuid,
        document_type: DocumentType,
    ) -> Result<(String, i32), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (prefix, current_number): (Option<String>, i32) = sqlx::query_as(
            r#"
            INSERT INTO document_sequences (org_id, type, prefix, current_number)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (org_id, type) DO UPDATE
            SET current_number = document_sequences.current_number + 1, updated_at = now()
            RETURNING prefix, current_number
            "#,
        )
        .bind(org_id)
        .bind(document_type.as_str())
        .bind(document_type.prefix())
        .fetch_one(executor)
        .await?;

        Ok((prefix.unwrap_or_else(|| document_type.prefix().to_string()), current_number))
    }
}
