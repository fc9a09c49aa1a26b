// src/services/tenant_router.rs

use std::{str::FromStr, time::Duration};

use moka::future::Cache;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use url::Url;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{tenant_schema, TenantRepository},
};

pub const SHARED_SCHEMA: &str = "public";

/// Conexão já apontada para o schema da organização.
#[derive(Debug, Clone)]
pub struct TenantConnection {
    pub org_id: Uuid,
    pub schema: String,
    pub pool: PgPool,
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_connections: u32,
    pub idle_secs: u64,
    pub max_cached_pools: u64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            idle_secs: 600,
            max_cached_pools: 256,
        }
    }
}

/// Resolve organização -> schema -> pool.
/// Um pool por schema, criado sob demanda e descartado depois de ficar ocioso.
#[derive(Clone)]
pub struct TenantRouter {
    main_pool: PgPool,
    database_url: String,
    base_options: PgConnectOptions,
    tenant_repo: TenantRepository,
    pools: Cache<String, PgPool>,
    options: RouterOptions,
}

impl TenantRouter {
    pub fn new(
        main_pool: PgPool,
        database_url: &str,
        tenant_repo: TenantRepository,
        options: RouterOptions,
    ) -> anyhow::Result<Self> {
        let base_options = PgConnectOptions::from_str(database_url)?;
        let pools = Cache::builder()
            .max_capacity(options.max_cached_pools)
            .time_to_idle(Duration::from_secs(options.idle_secs))
            .build();

        Ok(Self {
            main_pool,
            database_url: database_url.to_string(),
            base_options,
            tenant_repo,
            pools,
            options,
        })
    }

    pub async fn resolve(&self, org_id: Uuid) -> Result<TenantConnection, AppError> {
        // 1. Organização -> schema
        let org = self
            .tenant_repo
            .find_organization(org_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Organização não encontrada.".to_string()))?;

        let schema = match org.db_schema.as_deref().map(str::trim) {
            Some(schema) if !schema.is_empty() => schema.to_string(),
            _ => {
                // 2. Nunca provisionada: grava o fallback compartilhado
                let db_url = self.schema_url(SHARED_SCHEMA)?;
                let updated = self
                    .tenant_repo
                    .set_schema(&self.main_pool, org_id, SHARED_SCHEMA, Some(&db_url), SHARED_SCHEMA)
                    .await?;
                if updated {
                    tracing::info!(%org_id, "organização sem schema próprio: usando '{}'", SHARED_SCHEMA);
                    SHARED_SCHEMA.to_string()
                } else {
                    // Provisionada entre a leitura e a escrita
                    self.tenant_repo
                        .find_organization(org_id)
                        .await?
                        .and_then(|org| org.db_schema)
                        .unwrap_or_else(|| SHARED_SCHEMA.to_string())
                }
            }
        };

        // 3. Schema -> pool
        let pool = self.pool_for(&schema).await?;
        Ok(TenantConnection { org_id, schema, pool })
    }

    /// Pool com `search_path=<schema>,public`. Chamadas concorrentes para o mesmo schema
    /// recebem o mesmo pool.
    pub async fn pool_for(&self, schema: &str) -> Result<PgPool, AppError> {
        if schema == SHARED_SCHEMA {
            return Ok(self.main_pool.clone());
        }
        if !tenant_schema::is_valid_schema_name(schema) {
            return Err(AppError::Validation(format!("Nome de schema inválido: '{}'.", schema)));
        }

        let connect_options = self
            .base_options
            .clone()
            .options([("search_path", format!("{},{}", schema, SHARED_SCHEMA))]);
        let max_connections = self.options.max_connections;
        let idle = Duration::from_secs(self.options.idle_secs);
        let label = schema.to_string();

        let pool = self
            .pools
            .get_with(schema.to_string(), async move {
                tracing::debug!(schema = %label, "criando pool para o schema");
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .idle_timeout(idle)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect_lazy_with(connect_options)
            })
            .await;

        Ok(pool)
    }

    /// Chamado depois de um provisionamento: deixa o pool do novo schema pronto.
    pub async fn register_schema(&self, schema: &str) -> Result<(), AppError> {
        self.pool_for(schema).await?;
        tracing::info!(schema, "schema registrado no roteador");
        Ok(())
    }

    /// URL de conexão que fixa o `search_path` no schema.
    pub fn schema_url(&self, schema: &str) -> Result<String, AppError> {
        build_search_path_url(&self.database_url, schema)
    }

    pub async fn cached_pools(&self) -> u64 {
        self.pools.run_pending_tasks().await;
        self.pools.entry_count()
    }
}

/// Acrescenta (ou funde) `options=-c search_path=<schema>,public` na URL.
pub fn build_search_path_url(base_url: &str, schema: &str) -> Result<String, AppError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| anyhow::anyhow!("URL de banco inválida: {}", e))?;

    let search_path = format!("-c search_path={},{}", schema, SHARED_SCHEMA);
    let mut merged = search_path.clone();
    let mut others = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "options" {
            if !value.trim().is_empty() {
                merged = format!("{} {}", value, search_path);
            }
        } else {
            others.push((key.into_owned(), value.into_owned()));
        }
    }

    url.query_pairs_mut()
        .clear()
        .extend_pairs(others)
        .append_pair("options", &merged);

    Ok(url.to_string())
}
