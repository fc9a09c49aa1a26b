// src/db/invitation_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::tenancy::{Invitation, InvitationStatus},
};

#[derive(Clone)]
pub struct InvitationRepository {
    pool: PgPool,
}

pub struct NewInvitation<'a> {
    pub org_id: Uuid,
    pub email: &'a str,
    pub role: &'a str,
    pub team_id: Option<Uuid>,
    pub token_hash: &'a str,
    pub expires_at: DateTime<Utc>,
    pub created_by_user_id: Uuid,
}

impl InvitationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Invitation>, AppError> {
        let invite = sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invite)
    }

    /// Busca travando a linha: duas aceitações concorrentes do mesmo convite se serializam.
    pub async fn find_for_update<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<Invitation>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let invite = sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(invite)
    }

    pub async fn has_pending_for_email(&self, org_id: Uuid, email: &str) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM invitations
                WHERE org_id = $1 AND lower(email) = lower($2) AND status = 'pending' AND expires_at > now()
            )
            "#,
        )
        .bind(org_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn create(&self, input: NewInvitation<'_>) -> Result<Invitation, AppError> {
        let invite = sqlx::query_as::<_, Invitation>(
            r#"
            INSERT INTO invitations (org_id, email, role, team_id, token_hash, status, expires_at, created_by_user_id)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING *
            "#,
        )
        .bind(input.org_id)
        .bind(input.email)
        .bind(input.role)
        .bind(input.team_id)
        .bind(input.token_hash)
        .bind(input.expires_at)
        .bind(input.created_by_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(invite)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_for_org(&self, org_id: Uuid) -> Result<Vec<Invitation>, AppError> {
        let invites = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE org_id = $1 ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invites)
    }

    pub async fn mark_expired<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE invitations SET status = $2 WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .bind(InvitationStatus::Expired.as_str())
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn mark_accepted<'e, E>(&self, executor: E, id: Uuid, user_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE invitations
            SET status = $2, accepted_by_user_id = $3, accepted_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(InvitationStatus::Accepted.as_str())
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
