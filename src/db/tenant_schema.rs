// src/db/tenant_schema.rs
//
// Definição explícita e versionada das tabelas de um tenant.
// Cada schema de organização (e o schema compartilhado `public`) recebe exatamente estas tabelas.
// Para evoluir o modelo: acrescente uma nova migração com `version` maior; nunca edite uma antiga.

use sqlx::{Executor, Postgres, Transaction};

use crate::common::error::AppError;

/// Placeholder substituído pelo nome (já validado) do schema.
const SCHEMA: &str = "{schema}";

pub struct TenantMigration {
    pub version: i32,
    pub statements: &'static [&'static str],
}

pub const TENANT_TABLES: &[&str] = &[
    "clients",
    "client_contacts",
    "missions",
    "quotes",
    "invoices",
    "payments",
    "credit_notes",
    "equipment",
    "mission_equipment",
    "equipment_movements",
    "company_settings",
    "document_sequences",
    "mission_ratings",
];

pub const TENANT_MIGRATIONS: &[TenantMigration] = &[TenantMigration {
    version: 1,
    statements: &[
        r#"CREATE TABLE IF NOT EXISTS "{schema}".clients (
            id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id     UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            name       TEXT NOT NULL,
            email      TEXT,
            phone      VARCHAR(32),
            address    TEXT,
            notes      TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE INDEX IF NOT EXISTS clients_org_idx ON "{schema}".clients(org_id)"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".client_contacts (
            id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            client_id  UUID NOT NULL REFERENCES "{schema}".clients(id) ON DELETE CASCADE,
            name       TEXT NOT NULL,
            email      TEXT,
            phone      VARCHAR(32),
            role       TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".missions (
            id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id     UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            client_id  UUID REFERENCES "{schema}".clients(id) ON DELETE SET NULL,
            title      TEXT NOT NULL,
            status     VARCHAR(32) NOT NULL DEFAULT 'planned',
            starts_at  TIMESTAMPTZ,
            ends_at    TIMESTAMPTZ,
            location   TEXT,
            notes      TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE INDEX IF NOT EXISTS missions_org_idx ON "{schema}".missions(org_id)"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".quotes (
            id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id      UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            number      VARCHAR(32) NOT NULL,
            client_id   UUID REFERENCES "{schema}".clients(id) ON DELETE SET NULL,
            mission_id  UUID REFERENCES "{schema}".missions(id) ON DELETE SET NULL,
            status      VARCHAR(32) NOT NULL DEFAULT 'draft',
            total_cents BIGINT NOT NULL DEFAULT 0,
            issued_at   DATE,
            valid_until DATE,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (org_id, number)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".invoices (
            id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id      UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            number      VARCHAR(32) NOT NULL,
            client_id   UUID REFERENCES "{schema}".clients(id) ON DELETE SET NULL,
            quote_id    UUID REFERENCES "{schema}".quotes(id) ON DELETE SET NULL,
            mission_id  UUID REFERENCES "{schema}".missions(id) ON DELETE SET NULL,
            status      VARCHAR(32) NOT NULL DEFAULT 'draft',
            total_cents BIGINT NOT NULL DEFAULT 0,
            issued_at   DATE,
            due_at      DATE,
            paid_at     TIMESTAMPTZ,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (org_id, number)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".payments (
            id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            invoice_id   UUID NOT NULL REFERENCES "{schema}".invoices(id) ON DELETE CASCADE,
            amount_cents BIGINT NOT NULL,
            method       VARCHAR(32) NOT NULL,
            paid_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".credit_notes (
            id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id       UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            invoice_id   UUID REFERENCES "{schema}".invoices(id) ON DELETE SET NULL,
            number       VARCHAR(32) NOT NULL,
            amount_cents BIGINT NOT NULL,
            reason       TEXT,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".equipment (
            id               UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id           UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            name             TEXT NOT NULL,
            category         TEXT,
            serial_number    TEXT,
            barcode          TEXT,
            status           VARCHAR(32) NOT NULL DEFAULT 'available',
            daily_rate_cents BIGINT,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE INDEX IF NOT EXISTS equipment_barcode_idx ON "{schema}".equipment(barcode)"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".mission_equipment (
            id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            mission_id   UUID NOT NULL REFERENCES "{schema}".missions(id) ON DELETE CASCADE,
            equipment_id UUID NOT NULL REFERENCES "{schema}".equipment(id) ON DELETE CASCADE,
            quantity     INTEGER NOT NULL DEFAULT 1,
            UNIQUE (mission_id, equipment_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".equipment_movements (
            id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            equipment_id UUID NOT NULL REFERENCES "{schema}".equipment(id) ON DELETE CASCADE,
            mission_id   UUID REFERENCES "{schema}".missions(id) ON DELETE SET NULL,
            kind         VARCHAR(16) NOT NULL,
            quantity     INTEGER NOT NULL DEFAULT 1,
            notes        TEXT,
            moved_at     TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".company_settings (
            id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id       UUID NOT NULL UNIQUE REFERENCES public.organizations(id) ON DELETE CASCADE,
            company_name TEXT,
            legal_id     TEXT,
            vat_number   TEXT,
            address      TEXT,
            email        TEXT,
            phone        VARCHAR(32),
            logo_url     TEXT,
            updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".document_sequences (
            id             UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id         UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
            type           VARCHAR(16) NOT NULL,
            prefix         VARCHAR(16),
            current_number INTEGER NOT NULL DEFAULT 0 CHECK (current_number >= 0),
            updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (org_id, type)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "{schema}".mission_ratings (
            id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            mission_id UUID NOT NULL REFERENCES "{schema}".missions(id) ON DELETE CASCADE,
            score      INTEGER NOT NULL CHECK (score BETWEEN 1 AND 5),
            comment    TEXT,
            token      VARCHAR(128),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    ],
}];

/// Versão mais recente da definição.
pub fn latest_version() -> i32 {
    TENANT_MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Identificador PostgreSQL seguro para interpolar: minúsculas, dígitos e `_`, até 63 bytes.
pub fn is_valid_schema_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Aplica, dentro da transação recebida, as migrações ainda não aplicadas ao schema.
/// Devolve a versão resultante.
pub async fn apply(tx: &mut Transaction<'_, Postgres>, schema: &str) -> Result<i32, AppError> {
    if !is_valid_schema_name(schema) {
        return Err(AppError::Validation(format!("Nome de schema inválido: '{}'.", schema)));
    }

    // Serializa provisionamentos concorrentes do mesmo schema
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(schema)
        .execute(&mut **tx)
        .await?;

    (&mut **tx)
        .execute(sqlx::raw_sql(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, schema)))
        .await?;

    let current: Option<(i32,)> =
        sqlx::query_as("SELECT version FROM public.tenant_schema_versions WHERE schema_name = $1")
            .bind(schema)
            .fetch_optional(&mut **tx)
            .await?;
    let current = current.map(|(v,)| v).unwrap_or(0);

    for migration in TENANT_MIGRATIONS.iter().filter(|m| m.version > current) {
        for statement in migration.statements {
            (&mut **tx)
                .execute(sqlx::raw_sql(&statement.replace(SCHEMA, schema)))
                .await?;
        }
        tracing::debug!(schema, version = migration.version, "migração de tenant aplicada");
    }

    let latest = latest_version().max(current);
    sqlx::query(
        r#"
        INSERT INTO public.tenant_schema_versions (schema_name, version)
        VALUES ($1, $2)
        ON CONFLICT (schema_name) DO UPDATE
        SET version = GREATEST(tenant_schema_versions.version, EXCLUDED.version), applied_at = now()
        "#,
    )
    .bind(schema)
    .bind(latest)
    .execute(&mut **tx)
    .await?;

    Ok(latest)
}

/// Tabelas base existentes no schema, em ordem alfabética.
pub async fn list_tables(pool: &sqlx::PgPool, schema: &str) -> Result<Vec<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT table_name::text FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}
