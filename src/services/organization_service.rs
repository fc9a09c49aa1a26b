// src/services/organization_service.rs

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{TenantRepository, UserRepository},
    models::{
        auth::Role,
        signup::CompanyProfile,
        tenancy::{Organization, Plan, Team, DEFAULT_TEAM_DESCRIPTION, DEFAULT_TEAM_NAME, PLAN_DEFINITIONS},
    },
};

const DEFAULT_ORG_NAME: &str = "Planify";

#[derive(Clone)]
pub struct OrganizationService {
    tenant_repo: TenantRepository,
    user_repo: UserRepository,
}

impl OrganizationService {
    pub fn new(tenant_repo: TenantRepository, user_repo: UserRepository) -> Self {
        Self { tenant_repo, user_repo }
    }

    /// Semeia o catálogo de planos. Idempotente.
    pub async fn ensure_default_plans(&self) -> Result<(), AppError> {
        for (code, name) in PLAN_DEFINITIONS {
            self.tenant_repo.ensure_plan(code, name).await?;
        }
        Ok(())
    }

    pub async fn find_plan_by_code(&self, code: &str) -> Result<Option<Plan>, AppError> {
        self.tenant_repo.find_plan_by_code(code.trim()).await
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, AppError> {
        self.tenant_repo.list_plans().await
    }

    pub async fn find_organization(&self, org_id: Uuid) -> Result<Option<Organization>, AppError> {
        self.tenant_repo.find_organization(org_id).await
    }

    /// LÓGICA DE NEGÓCIO: cria a organização com plano ativo e time padrão e,
    /// se houver usuário, torna-o admin e membro do time.
    /// Roda na conexão recebida: o chamador decide a fronteira da transação.
    pub async fn create_org_and_plan(
        &self,
        conn: &mut PgConnection,
        profile: &CompanyProfile,
        plan_id: Uuid,
        owner_id: Option<Uuid>,
    ) -> Result<Organization, AppError> {
        let name = profile
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_ORG_NAME);

        // 1. Organização
        let org = self
            .tenant_repo
            .create_organization(&mut *conn, name, profile, owner_id)
            .await?;

        // 2. Plano ativo
        self.tenant_repo.bind_plan(&mut *conn, org.id, plan_id).await?;

        // 3. Time padrão
        let team = self
            .tenant_repo
            .create_team(&mut *conn, org.id, DEFAULT_TEAM_NAME, Some(DEFAULT_TEAM_DESCRIPTION), owner_id)
            .await?;

        // 4. Dono vira admin
        if let Some(user_id) = owner_id {
            self.user_repo
                .assign_organization(&mut *conn, user_id, org.id, Role::Admin.as_str())
                .await?;
            self.tenant_repo
                .add_team_member(&mut *conn, team.id, user_id, Role::Admin.as_str())
                .await?;
        }

        tracing::info!(org_id = %org.id, %plan_id, "organização criada");
        Ok(org)
    }

    /// Time padrão da organização; criado se ainda não existir.
    pub async fn default_team(
        &self,
        conn: &mut PgConnection,
        org_id: Uuid,
        created_by: Option<Uuid>,
    ) -> Result<Team, AppError> {
        if let Some(team) = self.tenant_repo.find_first_team(&mut *conn, org_id).await? {
            return Ok(team);
        }
        self.tenant_repo
            .create_team(&mut *conn, org_id, DEFAULT_TEAM_NAME, Some(DEFAULT_TEAM_DESCRIPTION), created_by)
            .await
    }
}
