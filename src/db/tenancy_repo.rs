// src/db/tenancy_repo.rs

use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        signup::CompanyProfile,
        tenancy::{Organization, OrgPlan, Plan, Team, TeamMember},
    },
};

#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    //  ORGANIZATIONS
    // =========================================================================

    pub async fn create_organization<'e, E>(
        &self,
        executor: E,
        name: &str,
        profile: &CompanyProfile,
        created_by_user_id: Option<Uuid>,
    ) -> Result<Organization, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (name, country, address, phone, size, sector, created_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(profile.country.as_deref())
        .bind(profile.address.as_deref())
        .bind(profile.phone.as_deref())
        .bind(profile.size.as_deref())
        .bind(profile.sector.as_deref())
        .bind(created_by_user_id)
        .fetch_one(executor)
        .await?;

        Ok(org)
    }

    pub async fn find_organization(&self, org_id: Uuid) -> Result<Option<Organization>, AppError> {
        let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(org)
    }

    /// Grava o schema do tenant. Só substitui um valor vazio ou o fallback compartilhado,
    /// para que um schema provisionado nunca seja trocado.
    pub async fn set_schema<'e, E>(
        &self,
        executor: E,
        org_id: Uuid,
        db_schema: &str,
        db_url: Option<&str>,
        replaceable: &str,
    ) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET db_schema = $2, db_url = $3, updated_at = now()
            WHERE id = $1 AND (db_schema IS NULL OR db_schema = $4 OR db_schema = $2)
            "#,
        )
        .bind(org_id)
        .bind(db_schema)
        .bind(db_url)
        .bind(replaceable)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    //  PLANS
    // =========================================================================

    /// Semeia um plano do catálogo. Idempotente.
    pub async fn ensure_plan(&self, code: &str, name: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO plans (code, name, status, price_cents, currency)
            VALUES ($1, $2, 'active', 0, 'EUR')
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(code)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_plan_by_code(&self, code: &str) -> Result<Option<Plan>, AppError> {
        let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, AppError> {
        let plans = sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE status = 'active' ORDER BY price_cents, code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    pub async fn bind_plan<'e, E>(
        &self,
        executor: E,
        org_id: Uuid,
        plan_id: Uuid,
    ) -> Result<OrgPlan, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let binding = sqlx::query_as::<_, OrgPlan>(
            r#"
            INSERT INTO org_plans (org_id, plan_id, status)
            VALUES ($1, $2, 'active')
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(plan_id)
        .fetch_one(executor)
        .await?;
        Ok(binding)
    }

    pub async fn list_org_plans(&self, org_id: Uuid) -> Result<Vec<OrgPlan>, AppError> {
        let bindings = sqlx::query_as::<_, OrgPlan>(
            "SELECT * FROM org_plans WHERE org_id = $1 ORDER BY started_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bindings)
    }

    // =========================================================================
    //  TEAMS
    // =========================================================================

    pub async fn create_team<'e, E>(
        &self,
        executor: E,
        org_id: Uuid,
        name: &str,
        description: Option<&str>,
        created_by_user_id: Option<Uuid>,
    ) -> Result<Team, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let team = sqlx::query_as::<_, Team>(
            r#"
            INSERT INTO teams (org_id, name, description, created_by_user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(name)
        .bind(description)
        .bind(created_by_user_id)
        .fetch_one(executor)
        .await?;
        Ok(team)
    }

    pub async fn find_first_team<'e, E>(&self, executor: E, org_id: Uuid) -> Result<Option<Team>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let team = sqlx::query_as::<_, Team>(
            "SELECT * FROM teams WHERE org_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(org_id)
        .fetch_optional(executor)
        .await?;
        Ok(team)
    }

    pub async fn list_teams(&self, org_id: Uuid) -> Result<Vec<Team>, AppError> {
        let teams = sqlx::query_as::<_, Team>(
            "SELECT * FROM teams WHERE org_id = $1 ORDER BY created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(teams)
    }

    /// Adiciona um membro ao time. Já ser membro não é erro.
    pub async fn add_team_member<'e, E>(
        &self,
        executor: E,
        team_id: Uuid,
        user_id: Uuid,
        role: &str,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (team_id, user_id) DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .bind(role)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, AppError> {
        let members = sqlx::query_as::<_, TeamMember>(
            "SELECT * FROM team_members WHERE team_id = $1 ORDER BY created_at",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}
