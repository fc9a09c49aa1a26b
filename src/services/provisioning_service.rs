// src/services/provisioning_service.rs

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::tenant_schema,
    services::tenant_router::{TenantRouter, SHARED_SCHEMA},
};

/// Resultado de um provisionamento bem-sucedido.
#[derive(Debug, Clone)]
pub struct ProvisionedSchema {
    pub schema: String,
    pub db_url: String,
    pub version: i32,
}

/// Cria (uma única vez) o schema isolado de uma organização.
#[derive(Clone)]
pub struct ProvisioningService {
    pool: PgPool,
    router: TenantRouter,
}

impl ProvisioningService {
    pub fn new(pool: PgPool, router: TenantRouter) -> Self {
        Self { pool, router }
    }

    /// Aplica a definição versionada ao schema. Repetir a chamada não muda nada.
    pub async fn provision_schema(&self, schema: &str) -> Result<ProvisionedSchema, AppError> {
        // 1. Toda a DDL numa transação: uma falha não deixa nada pela metade
        let mut tx = self.pool.begin().await?;

        // 2. Cria o schema e as tabelas que faltam
        let version = tenant_schema::apply(&mut tx, schema).await?;

        // 3. Commit
        tx.commit().await?;

        let db_url = self.router.schema_url(schema)?;
        tracing::info!(schema, version, "schema de tenant provisionado");

        Ok(ProvisionedSchema {
            schema: schema.to_string(),
            db_url,
            version,
        })
    }

    /// Deixa o pool do schema recém-provisionado pronto no roteador.
    pub async fn announce(&self, schema: &str) -> Result<(), AppError> {
        self.router.register_schema(schema).await
    }

    /// Na inicialização: mantém o schema compartilhado com a mesma estrutura dos tenants.
    pub async fn ensure_shared_schema(&self) -> Result<i32, AppError> {
        let provisioned = self.provision_schema(SHARED_SCHEMA).await?;
        Ok(provisioned.version)
    }

    /// Schemas já registrados, com a versão aplicada.
    pub async fn schema_versions(&self) -> Result<Vec<(String, i32)>, AppError> {
        let rows: Vec<(String, i32)> = sqlx::query_as(
            "SELECT schema_name, version FROM tenant_schema_versions ORDER BY schema_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// `org_` + os 12 primeiros dígitos hex do uuid, sem hífens.
pub fn schema_name_for(org_id: Uuid) -> String {
    let simple = org_id.simple().to_string();
    format!("org_{}", &simple[..12])
}
