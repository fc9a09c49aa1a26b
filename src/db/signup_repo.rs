// src/db/signup_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::signup::{FlowIntent, NewSignupFlow, ProvisioningStatus, SignupFlow, SignupStatus},
};

// Persistência dos fluxos de cadastro. Toda escrita de status avança `updated_at`.
#[derive(Clone)]
pub struct SignupRepository {
    pool: PgPool,
}

impl SignupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert<'e, E>(&self, executor: E, flow: &NewSignupFlow) -> Result<SignupFlow, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (org_id, invitation_id) = match flow.intent {
            FlowIntent::SelfServe => (None, None),
            FlowIntent::Invited { org_id, invitation_id } => (Some(org_id), Some(invitation_id)),
        };

        let created = sqlx::query_as::<_, SignupFlow>(
            r#"
            INSERT INTO signup_flows (
                email, user_id, org_id, invitation_id,
                company_name, country, address, phone, size, sector,
                status, code_hash, code_expires_at, attempts_count,
                last_sent_at, resend_available_at, provisioning_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(&flow.email)
        .bind(flow.user_id)
        .bind(org_id)
        .bind(invitation_id)
        .bind(flow.profile.company_name.as_deref())
        .bind(flow.profile.country.as_deref())
        .bind(flow.profile.address.as_deref())
        .bind(flow.profile.phone.as_deref())
        .bind(flow.profile.size.as_deref())
        .bind(flow.profile.sector.as_deref())
        .bind(SignupStatus::CodeSent.as_str())
        .bind(&flow.code_hash)
        .bind(flow.code_expires_at)
        .bind(flow.sent_at)
        .bind(flow.resend_available_at)
        .bind(ProvisioningStatus::Pending.as_str())
        .fetch_one(executor)
        .await?;

        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<SignupFlow>, AppError> {
        let flow = sqlx::query_as::<_, SignupFlow>("SELECT * FROM signup_flows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(flow)
    }

    /// Trava a linha do fluxo até o fim da transação: transições do mesmo fluxo se serializam.
    pub async fn find_for_update<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<SignupFlow>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let flow = sqlx::query_as::<_, SignupFlow>("SELECT * FROM signup_flows WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(flow)
    }

    pub async fn delete<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM signup_flows WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Expiração preguiçosa: só um fluxo ainda em `code_sent` e com o código vencido em `now` vira `expired`.
    /// Devolve `false` quando o fluxo mudou antes (ex.: reenvio com código novo).
    pub async fn mark_expired<'e, E>(&self, executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE signup_flows SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3 AND code_expires_at < $4
            "#,
        )
        .bind(id)
        .bind(SignupStatus::Expired.as_str())
        .bind(SignupStatus::CodeSent.as_str())
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Incrementa o contador de tentativas e devolve o novo valor.
    pub async fn record_failed_attempt<'e, E>(&self, executor: E, id: Uuid) -> Result<i32, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (attempts,): (i32,) = sqlx::query_as(
            r#"
            UPDATE signup_flows SET attempts_count = attempts_count + 1, updated_at = now()
            WHERE id = $1
            RETURNING attempts_count
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await?;
        Ok(attempts)
    }

    /// Código aceito: limpa o hash e o contador e grava o novo status.
    pub async fn mark_code_accepted<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        status: SignupStatus,
        org_id: Option<Uuid>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE signup_flows
            SET status = $2, code_hash = NULL, code_expires_at = NULL, attempts_count = 0,
                org_id = COALESCE($3, org_id), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(org_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn reset_code<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        code_hash: &str,
        code_expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        resend_available_at: DateTime<Utc>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE signup_flows
            SET status = $2, code_hash = $3, code_expires_at = $4, attempts_count = 0,
                last_sent_at = $5, resend_available_at = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SignupStatus::CodeSent.as_str())
        .bind(code_hash)
        .bind(code_expires_at)
        .bind(sent_at)
        .bind(resend_available_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_plan_selected<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        org_id: Uuid,
        plan_id: Uuid,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE signup_flows
            SET status = $2, org_id = $3, plan_id = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SignupStatus::PlanSelected.as_str())
        .bind(org_id)
        .bind(plan_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_provisioning<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE signup_flows SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(SignupStatus::Provisioning.as_str())
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_provisioned<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        db_schema: &str,
        db_url: &str,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE signup_flows
            SET status = $2, provisioning_status = $3, db_schema = $4, db_url = $5,
                last_error = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SignupStatus::Completed.as_str())
        .bind(ProvisioningStatus::Success.as_str())
        .bind(db_schema)
        .bind(db_url)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Falha de provisionamento: o status continua `provisioning` para permitir nova tentativa.
    /// Um fluxo já `completed` nunca volta; devolve `false` nesse caso.
    pub async fn mark_provisioning_failed(&self, id: Uuid, error: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE signup_flows
            SET provisioning_status = $3, last_error = $4, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(SignupStatus::Provisioning.as_str())
        .bind(ProvisioningStatus::Failed.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
