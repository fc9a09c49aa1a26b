// src/services/invitation_service.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{invitation_repo::NewInvitation, InvitationRepository, TenantRepository, UserRepository},
    models::{
        auth::{Role, User},
        tenancy::{CreateInvitationPayload, Invitation},
    },
    services::{
        audit::{AuditEvent, AuditSink},
        email::{invitation_email, EmailSender},
        organization_service::OrganizationService,
        verification::KeyedHasher,
    },
};

pub const INVITE_TTL_DAYS: i64 = 7;

/// Resultado da entrada de um usuário na organização de um convite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { org_id: Uuid },
    /// O convite venceu e foi marcado como `expired`; o chamador confirma e responde erro.
    Expired,
}

#[derive(Clone)]
pub struct InvitationService {
    pool: PgPool,
    invitation_repo: InvitationRepository,
    tenant_repo: TenantRepository,
    user_repo: UserRepository,
    org_service: OrganizationService,
    hasher: KeyedHasher,
    mailer: Arc<dyn EmailSender>,
    audit: Arc<dyn AuditSink>,
    app_url: String,
}

impl InvitationService {
    pub fn new(
        pool: PgPool,
        org_service: OrganizationService,
        hasher: KeyedHasher,
        mailer: Arc<dyn EmailSender>,
        audit: Arc<dyn AuditSink>,
        app_url: String,
    ) -> Self {
        Self {
            invitation_repo: InvitationRepository::new(pool.clone()),
            tenant_repo: TenantRepository::new(pool.clone()),
            user_repo: UserRepository::new(pool.clone()),
            pool,
            org_service,
            hasher,
            mailer,
            audit,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn hash_token(&self, token: &str) -> String {
        self.hasher.hash(token.trim())
    }

    /// Cria o convite e envia o link por e-mail. Se o envio falhar, o convite é apagado.
    pub async fn create(
        &self,
        admin: &User,
        org_id: Uuid,
        payload: &CreateInvitationPayload,
        client_ip: &str,
    ) -> Result<Invitation, AppError> {
        let email = payload.email.trim().to_lowercase();
        let role = invite_role(payload.role.as_deref());

        // 1. Um convite pendente por (organização, e-mail)
        if self.invitation_repo.has_pending_for_email(org_id, &email).await? {
            return Err(AppError::Conflict(
                "Já existe um convite pendente para este e-mail.".to_string(),
            ));
        }

        // 2. Time: o informado (se for da organização) ou o padrão
        let team_id = match payload.team_id {
            Some(team_id) => {
                let teams = self.tenant_repo.list_teams(org_id).await?;
                if !teams.iter().any(|t| t.id == team_id) {
                    return Err(AppError::Validation("Time não pertence à organização.".to_string()));
                }
                team_id
            }
            None => {
                let mut conn = self.pool.acquire().await?;
                self.org_service
                    .default_team(&mut *conn, org_id, Some(admin.id))
                    .await?
                    .id
            }
        };

        // 3. Token aleatório; só o hash é guardado
        let token = Uuid::new_v4().to_string();
        let invite = self
            .invitation_repo
            .create(NewInvitation {
                org_id,
                email: &email,
                role: role.as_str(),
                team_id: Some(team_id),
                token_hash: &self.hash_token(&token),
                expires_at: Utc::now() + Duration::days(INVITE_TTL_DAYS),
                created_by_user_id: admin.id,
            })
            .await?;

        // 4. E-mail
        let org_name = self
            .tenant_repo
            .find_organization(org_id)
            .await?
            .map(|org| org.name)
            .unwrap_or_else(|| "Planify".to_string());
        let link = format!("{}/invite?token={}", self.app_url, token);
        let (subject, html) = invitation_email(&org_name, &link);

        if let Err(e) = self.mailer.send(&email, &subject, &html).await {
            tracing::error!(invitation_id = %invite.id, error = %e, "invitation:email_failed");
            self.invitation_repo.delete(invite.id).await?;
            return Err(e);
        }

        tracing::info!(invitation_id = %invite.id, %org_id, "invitation:created");
        self.audit
            .record(
                AuditEvent::new("invitation.created", "invitation", Some(invite.id))
                    .org(Some(org_id))
                    .actor(Some(admin.id))
                    .ip(client_ip)
                    .metadata(json!({ "email": email, "role": role.as_str() })),
            )
            .await;

        Ok(invite)
    }

    pub async fn list(&self, org_id: Uuid) -> Result<Vec<Invitation>, AppError> {
        self.invitation_repo.list_for_org(org_id).await
    }

    /// Convite válido para um novo cadastro: pendente, no prazo e para o mesmo e-mail.
    pub async fn validate_for_signup(
        &self,
        token: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Invitation, AppError> {
        let invite = self
            .invitation_repo
            .find_by_token_hash(&self.hash_token(token))
            .await?
            .filter(|invite| invite.is_pending())
            .ok_or_else(|| AppError::Validation("Convite inválido.".to_string()))?;

        if invite.is_expired_at(now) {
            self.invitation_repo.mark_expired(&self.pool, invite.id).await?;
            return Err(AppError::InvitationExpired);
        }
        if !invite.matches_email(email) {
            return Err(AppError::Validation("E-mail diferente do convite.".to_string()));
        }
        Ok(invite)
    }

    /// Usuário já autenticado aceita um convite pelo token.
    pub async fn accept(&self, user: &User, token: &str, client_ip: &str) -> Result<Uuid, AppError> {
        let invite = self
            .invitation_repo
            .find_by_token_hash(&self.hash_token(token))
            .await?
            .ok_or_else(|| AppError::Validation("Convite inválido.".to_string()))?;

        let mut tx = self.pool.begin().await?;
        let outcome = self.join(&mut *tx, user.id, &user.email, invite.id, Utc::now()).await?;
        tx.commit().await?;

        match outcome {
            JoinOutcome::Expired => Err(AppError::InvitationExpired),
            JoinOutcome::Joined { org_id } => {
                tracing::info!(user_id = %user.id, %org_id, "invitation:accepted");
                self.audit
                    .record(
                        AuditEvent::new("invitation.accepted", "invitation", Some(invite.id))
                            .org(Some(org_id))
                            .actor(Some(user.id))
                            .ip(client_ip),
                    )
                    .await;
                Ok(org_id)
            }
        }
    }

    /// Corpo transacional da aceitação, compartilhado com a verificação de um cadastro convidado.
    /// Trava convite e usuário; confere status, prazo, e-mail e vínculo atual do usuário.
    pub async fn join(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        user_email: &str,
        invitation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, AppError> {
        // 1. Convite travado
        let invite = self
            .invitation_repo
            .find_for_update(&mut *conn, invitation_id)
            .await?
            .ok_or_else(|| AppError::Validation("Convite inválido.".to_string()))?;

        if !invite.is_pending() {
            return Err(AppError::Validation("Convite inválido.".to_string()));
        }
        if invite.is_expired_at(now) {
            self.invitation_repo.mark_expired(&mut *conn, invite.id).await?;
            return Ok(JoinOutcome::Expired);
        }
        if !invite.matches_email(user_email) {
            return Err(AppError::Validation("E-mail diferente do convite.".to_string()));
        }

        // 2. Usuário já ligado a outra organização não entra
        let current_org = self.user_repo.lock_org_binding(&mut *conn, user_id).await?;
        if current_org.is_some_and(|org_id| org_id != invite.org_id) {
            return Err(AppError::Conflict(
                "Usuário já vinculado a outra organização.".to_string(),
            ));
        }

        // 3. Organização, papel, time e convite
        let role = Role::normalize(&invite.role);
        self.user_repo
            .assign_organization(&mut *conn, user_id, invite.org_id, role.as_str())
            .await?;
        if let Some(team_id) = invite.team_id {
            self.tenant_repo
                .add_team_member(&mut *conn, team_id, user_id, role.as_str())
                .await?;
        }
        self.invitation_repo.mark_accepted(&mut *conn, invite.id, user_id).await?;

        Ok(JoinOutcome::Joined { org_id: invite.org_id })
    }
}

/// Papel pedido no convite. Ausente ou desconhecido vira `member`.
pub fn invite_role(raw: Option<&str>) -> Role {
    match raw.map(|r| r.trim().to_lowercase()) {
        Some(r) if matches!(r.as_str(), "admin" | "manager" | "member" | "viewer" | "dj" | "technicien") => {
            Role::normalize(&r)
        }
        _ => Role::Member,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_roles_default_to_member() {
        assert_eq!(invite_role(None), Role::Member);
        assert_eq!(invite_role(Some("owner")), Role::Member);
        assert_eq!(invite_role(Some("Viewer")), Role::Viewer);
        assert_eq!(invite_role(Some("admin")), Role::Admin);
        assert_eq!(invite_role(Some("technicien")), Role::Member);
    }
}
