// src/services/signup_service.rs

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{SignupRepository, TenantRepository, UserRepository},
    models::signup::{
        ChoosePlanPayload, CompanyProfile, FlowIntent, NewSignupFlow, ResendCodeResponse, SignupFlow,
        SignupStatus, SignupStatusResponse, StartSignupPayload, StartSignupResponse, TransitionResponse,
        VerifyCodePayload,
    },
    services::{
        audit::{AuditEvent, AuditSink},
        auth::AuthService,
        email::{verification_code_email, EmailSender},
        invitation_service::{InvitationService, JoinOutcome},
        organization_service::OrganizationService,
        provisioning_service::{schema_name_for, ProvisioningService},
        signup_flow::{decide, Command, Step},
        tenant_router::SHARED_SCHEMA,
        verification::{VerificationService, CODE_TTL_MINUTES, MAX_ATTEMPTS, RESEND_COOLDOWN_SECONDS},
    },
};

/// Resultado da consulta de status, com a instrução para o cookie de sessão do cadastro.
#[derive(Debug)]
pub struct StatusOutcome {
    pub response: SignupStatusResponse,
    pub clear_cookie: bool,
}

/// Orquestra o fluxo de cadastro: cada transição trava a linha do fluxo,
/// pergunta a `signup_flow::decide` e executa o passo devolvido.
#[derive(Clone)]
pub struct SignupService {
    pool: PgPool,
    signup_repo: SignupRepository,
    user_repo: UserRepository,
    tenant_repo: TenantRepository,
    auth_service: AuthService,
    verification: VerificationService,
    org_service: OrganizationService,
    provisioning: ProvisioningService,
    invitations: InvitationService,
    mailer: Arc<dyn EmailSender>,
    audit: Arc<dyn AuditSink>,
}

impl SignupService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        auth_service: AuthService,
        verification: VerificationService,
        org_service: OrganizationService,
        provisioning: ProvisioningService,
        invitations: InvitationService,
        mailer: Arc<dyn EmailSender>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            signup_repo: SignupRepository::new(pool.clone()),
            user_repo: UserRepository::new(pool.clone()),
            tenant_repo: TenantRepository::new(pool.clone()),
            pool,
            auth_service,
            verification,
            org_service,
            provisioning,
            invitations,
            mailer,
            audit,
        }
    }

    // =========================================================================
    //  START
    // =========================================================================

    pub async fn start(&self, payload: StartSignupPayload, client_ip: &str) -> Result<StartSignupResponse, AppError> {
        payload.validate()?;

        let email = payload.email.trim().to_lowercase();
        let profile = profile_from(&payload);
        let now = Utc::now();
        tracing::info!(%email, company = ?profile.company_name, "signup:start");

        // 1. Convite (opcional) ou perfil da empresa
        let intent = match non_empty(payload.invite_token.as_deref()) {
            Some(token) => {
                let invite = self.invitations.validate_for_signup(&token, &email, now).await?;
                FlowIntent::Invited { org_id: invite.org_id, invitation_id: invite.id }
            }
            None => {
                if profile.company_name.is_none() || profile.country.is_none() {
                    tracing::warn!(%email, "signup:start missing_fields");
                    return Err(AppError::Validation(
                        "E-mail, senha, empresa e país são obrigatórios.".to_string(),
                    ));
                }
                FlowIntent::SelfServe
            }
        };

        if self.auth_service.email_exists(&email).await? {
            tracing::warn!(%email, "signup:start email_exists");
            return Err(AppError::EmailAlreadyExists);
        }

        // 2. Usuário + fluxo numa transação
        let hashed_password = self.auth_service.hash_password(&payload.password).await?;
        let code = self.verification.generate_code();

        let mut tx = self.pool.begin().await?;
        let user = self
            .auth_service
            .create_user(&mut *tx, &email, &hashed_password)
            .await?;
        let flow = self
            .signup_repo
            .insert(
                &mut *tx,
                &NewSignupFlow {
                    email: email.clone(),
                    user_id: user.id,
                    intent,
                    profile,
                    code_hash: self.verification.hash_code(&code),
                    code_expires_at: self.verification.expiry_from(now),
                    sent_at: now,
                    resend_available_at: self.verification.resend_available_from(now),
                },
            )
            .await?;
        tx.commit().await?;
        tracing::info!(flow_id = %flow.id, %email, "signup:start flow_created");

        // 3. E-mail; se falhar, desfaz usuário e fluxo
        if let Err(e) = self.send_code(&email, &code).await {
            tracing::error!(flow_id = %flow.id, %email, error = %e, "signup:start email_send_failed");
            self.compensate_start(flow.id, user.id).await;
            return Err(e);
        }
        tracing::info!(flow_id = %flow.id, "signup:start verification_sent");

        self.audit
            .record(
                AuditEvent::new("signup.started", "signup_flow", Some(flow.id))
                    .org(flow.org_id)
                    .actor(Some(user.id))
                    .ip(client_ip)
                    .metadata(json!({ "invited": flow.invitation_id.is_some() })),
            )
            .await;

        Ok(StartSignupResponse {
            flow_id: flow.id,
            status: SignupStatus::CodeSent,
            next_step: SignupStatus::CodeSent.next_step().to_string(),
        })
    }

    /// Apaga fluxo e usuário numa única transação. Falha aqui só vai para o log.
    async fn compensate_start(&self, flow_id: Uuid, user_id: Uuid) {
        let result: Result<(), AppError> = async {
            let mut tx = self.pool.begin().await?;
            self.signup_repo.delete(&mut *tx, flow_id).await?;
            self.auth_service.delete_user(&mut *tx, user_id).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!(%flow_id, %user_id, "signup:start rolled_back"),
            Err(e) => tracing::error!(%flow_id, %user_id, error = %e, "signup:start rollback_failed"),
        }
    }

    // =========================================================================
    //  RESEND
    // =========================================================================

    pub async fn resend_code(&self, flow_id: Uuid, client_ip: &str) -> Result<ResendCodeResponse, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let flow = self.lock_flow(&mut tx, flow_id).await?;

        decide(&flow, Command::Resend, now).inspect_err(|e| {
            tracing::warn!(%flow_id, status = %flow.status, reason = e.kind(), "signup:resend rejected");
        })?;

        // Código novo, tentativas zeradas, novo prazo e cooldown
        let code = self.verification.generate_code();
        self.signup_repo
            .reset_code(
                &mut *tx,
                flow_id,
                &self.verification.hash_code(&code),
                self.verification.expiry_from(now),
                now,
                self.verification.resend_available_from(now),
            )
            .await?;
        tx.commit().await?;

        // O código novo fica gravado mesmo se o envio falhar
        self.send_code(&flow.email, &code).await.inspect_err(|e| {
            tracing::error!(%flow_id, error = %e, "signup:resend email_send_failed");
        })?;
        tracing::info!(%flow_id, "signup:resend code_sent");

        self.audit
            .record(AuditEvent::new("signup.code_resent", "signup_flow", Some(flow_id)).ip(client_ip))
            .await;

        Ok(ResendCodeResponse {
            status: SignupStatus::CodeSent,
            cooldown_seconds: RESEND_COOLDOWN_SECONDS,
        })
    }

    // =========================================================================
    //  VERIFY
    // =========================================================================

    pub async fn verify_code(&self, payload: VerifyCodePayload, client_ip: &str) -> Result<TransitionResponse, AppError> {
        payload.validate()?;
        let flow_id = payload.flow_id;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let flow = self.lock_flow(&mut tx, flow_id).await?;

        let code_matches = flow
            .code_hash
            .as_deref()
            .is_some_and(|stored| self.verification.verify_code(&payload.code, stored));

        let step = decide(&flow, Command::Verify { code_matches }, now).inspect_err(|e| {
            tracing::warn!(%flow_id, reason = e.kind(), "signup:verify rejected");
        })?;

        match step {
            Step::AlreadyDone(status) => {
                tx.commit().await?;
                Ok(transition(status, flow.org_id, flow.db_schema.clone()))
            }
            Step::ExpireCode => {
                self.signup_repo.mark_expired(&mut *tx, flow_id, now).await?;
                tx.commit().await?;
                tracing::warn!(%flow_id, "signup:verify code_expired");
                Err(AppError::CodeExpired)
            }
            Step::RejectCode { .. } => {
                let attempts = self.signup_repo.record_failed_attempt(&mut *tx, flow_id).await?;
                tx.commit().await?;
                tracing::warn!(%flow_id, attempts, "signup:verify invalid_code");
                Err(AppError::InvalidCode {
                    attempts_remaining: (MAX_ATTEMPTS - attempts).max(0),
                })
            }
            Step::JoinOrganization { org_id, invitation_id } => {
                let user_id = flow
                    .user_id
                    .ok_or_else(|| AppError::Validation("Usuário ausente no fluxo.".to_string()))?;

                // Tudo ou nada: usuário, time, convite e fluxo
                let outcome = self
                    .invitations
                    .join(&mut *tx, user_id, &flow.email, invitation_id, now)
                    .await?;
                if outcome == JoinOutcome::Expired {
                    tx.commit().await?;
                    tracing::warn!(%flow_id, %invitation_id, "signup:verify invitation_expired");
                    return Err(AppError::InvitationExpired);
                }
                self.signup_repo
                    .mark_code_accepted(&mut *tx, flow_id, SignupStatus::Completed, Some(org_id))
                    .await?;
                tx.commit().await?;

                tracing::info!(%flow_id, %org_id, %user_id, "signup:verify invitation_joined");
                self.audit
                    .record(
                        AuditEvent::new("signup.joined_organization", "signup_flow", Some(flow_id))
                            .org(Some(org_id))
                            .actor(Some(user_id))
                            .ip(client_ip)
                            .metadata(json!({ "invitationId": invitation_id })),
                    )
                    .await;
                Ok(transition(SignupStatus::Completed, Some(org_id), None))
            }
            Step::MarkVerified => {
                if let Some(user_id) = flow.user_id {
                    self.user_repo.mark_email_verified(&mut *tx, user_id).await?;
                }
                self.signup_repo
                    .mark_code_accepted(&mut *tx, flow_id, SignupStatus::Verified, None)
                    .await?;
                tx.commit().await?;

                tracing::info!(%flow_id, "signup:verify verified");
                self.audit
                    .record(
                        AuditEvent::new("signup.email_verified", "signup_flow", Some(flow_id))
                            .actor(flow.user_id)
                            .ip(client_ip),
                    )
                    .await;
                Ok(transition(SignupStatus::Verified, None, None))
            }
            other => Err(unexpected_step(other)),
        }
    }

    // =========================================================================
    //  CHOOSE PLAN
    // =========================================================================

    pub async fn choose_plan(&self, payload: ChoosePlanPayload, client_ip: &str) -> Result<TransitionResponse, AppError> {
        payload.validate()?;
        let flow_id = payload.flow_id;

        let mut tx = self.pool.begin().await?;
        let flow = self.lock_flow(&mut tx, flow_id).await?;

        let step = decide(&flow, Command::ChoosePlan, Utc::now()).inspect_err(|e| {
            tracing::warn!(%flow_id, status = %flow.status, reason = e.kind(), "signup:plan rejected");
        })?;

        match step {
            Step::AlreadyDone(status) => {
                tx.commit().await?;
                tracing::info!(%flow_id, org_id = ?flow.org_id, "signup:plan already_selected");
                Ok(transition(status, flow.org_id, flow.db_schema.clone()))
            }
            Step::CreateOrganization => {
                let plan = self
                    .org_service
                    .find_plan_by_code(&payload.plan_code)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Plano não encontrado.".to_string()))?;

                // Organização, plano, time, dono e fluxo na mesma transação
                let org = self
                    .org_service
                    .create_org_and_plan(&mut *tx, &profile_of(&flow), plan.id, flow.user_id)
                    .await?;
                self.signup_repo
                    .mark_plan_selected(&mut *tx, flow_id, org.id, plan.id)
                    .await?;
                tx.commit().await?;

                tracing::info!(%flow_id, org_id = %org.id, plan = %plan.code, "signup:plan success");
                self.audit
                    .record(
                        AuditEvent::new("organization.created", "organization", Some(org.id))
                            .org(Some(org.id))
                            .actor(flow.user_id)
                            .ip(client_ip)
                            .metadata(json!({ "plan": plan.code, "flowId": flow_id })),
                    )
                    .await;
                Ok(transition(SignupStatus::PlanSelected, Some(org.id), None))
            }
            other => Err(unexpected_step(other)),
        }
    }

    // =========================================================================
    //  PROVISION
    // =========================================================================

    pub async fn provision(&self, flow_id: Uuid, client_ip: &str) -> Result<TransitionResponse, AppError> {
        // 1. Decide e marca `provisioning` (curta, libera a trava antes da DDL)
        let mut tx = self.pool.begin().await?;
        let flow = self.lock_flow(&mut tx, flow_id).await?;

        let step = decide(&flow, Command::Provision, Utc::now()).inspect_err(|e| {
            tracing::warn!(%flow_id, status = %flow.status, reason = e.kind(), "signup:provision rejected");
        })?;

        let org_id = match step {
            Step::AlreadyDone(status) => {
                tx.commit().await?;
                return Ok(transition(status, flow.org_id, flow.db_schema.clone()));
            }
            Step::Provision { org_id } => org_id,
            other => return Err(unexpected_step(other)),
        };

        let schema = schema_name_for(org_id);
        self.signup_repo.mark_provisioning(&mut *tx, flow_id).await?;
        tx.commit().await?;
        tracing::info!(%flow_id, %org_id, %schema, "signup:provision start");

        // 2. DDL do tenant
        let provisioned = match self.provisioning.provision_schema(&schema).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(%flow_id, %org_id, %schema, error = %e, "signup:provision failed");
                if !self.signup_repo.mark_provisioning_failed(flow_id, &e.to_string()).await? {
                    // Outra chamada concluiu antes: o fluxo não volta de `completed`
                    let current = self.signup_repo.find_by_id(flow_id).await?;
                    if let Some(current) = current.filter(|f| f.status() == SignupStatus::Completed) {
                        tracing::warn!(%flow_id, %schema, "signup:provision failure ignored, already completed");
                        return Ok(transition(SignupStatus::Completed, current.org_id, current.db_schema));
                    }
                }
                return Err(AppError::Dependency(format!("Provisionamento do schema '{}' falhou.", schema)));
            }
        };

        // 3. Grava schema na organização e conclui o fluxo
        let mut tx = self.pool.begin().await?;
        let bound = self
            .tenant_repo
            .set_schema(&mut *tx, org_id, &provisioned.schema, Some(&provisioned.db_url), SHARED_SCHEMA)
            .await?;
        if !bound {
            return Err(AppError::Conflict(
                "Organização já possui outro schema.".to_string(),
            ));
        }
        self.signup_repo
            .mark_provisioned(&mut *tx, flow_id, &provisioned.schema, &provisioned.db_url)
            .await?;
        tx.commit().await?;

        // 4. Roteador
        self.provisioning.announce(&provisioned.schema).await?;

        tracing::info!(%flow_id, %org_id, schema = %provisioned.schema, "signup:provision completed");
        self.audit
            .record(
                AuditEvent::new("organization.provisioned", "organization", Some(org_id))
                    .org(Some(org_id))
                    .actor(flow.user_id)
                    .ip(client_ip)
                    .metadata(json!({ "schema": provisioned.schema, "version": provisioned.version })),
            )
            .await;

        Ok(transition(SignupStatus::Completed, Some(org_id), Some(provisioned.schema)))
    }

    // =========================================================================
    //  STATUS
    // =========================================================================

    /// `query_flow_id` vem da URL; `cookie_flow_id` do cookie de sessão do cadastro.
    pub async fn status(&self, query_flow_id: Option<Uuid>, cookie_flow_id: Option<Uuid>) -> Result<StatusOutcome, AppError> {
        let cookie_only = query_flow_id.is_none();
        let Some(flow_id) = query_flow_id.or(cookie_flow_id) else {
            return Ok(StatusOutcome { response: SignupStatusResponse::draft(), clear_cookie: true });
        };

        let Some(flow) = self.signup_repo.find_by_id(flow_id).await? else {
            return Ok(StatusOutcome { response: SignupStatusResponse::draft(), clear_cookie: true });
        };

        let now = Utc::now();
        let (flow, status) = match decide(&flow, Command::Observe, now)? {
            Step::LazyExpire => {
                if self.signup_repo.mark_expired(&self.pool, flow_id, now).await? {
                    tracing::info!(%flow_id, "signup:status expired");
                    (flow, SignupStatus::Expired)
                } else {
                    // O fluxo mudou entre a leitura e a escrita: vale o que está gravado
                    let Some(current) = self.signup_repo.find_by_id(flow_id).await? else {
                        return Ok(StatusOutcome { response: SignupStatusResponse::draft(), clear_cookie: true });
                    };
                    let status = current.status();
                    (current, status)
                }
            }
            Step::Report(status) => (flow, status),
            other => return Err(unexpected_step(other)),
        };

        // Fluxo concluído só é visível para quem tem o id explícito
        if status == SignupStatus::Completed && cookie_only {
            return Ok(StatusOutcome { response: SignupStatusResponse::draft(), clear_cookie: true });
        }

        Ok(StatusOutcome {
            response: SignupStatusResponse::of(&flow, status),
            clear_cookie: status.is_terminal(),
        })
    }

    // =========================================================================
    //  HELPERS
    // =========================================================================

    async fn lock_flow(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        flow_id: Uuid,
    ) -> Result<SignupFlow, AppError> {
        self.signup_repo
            .find_for_update(&mut **tx, flow_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(%flow_id, "signup flow_not_found");
                AppError::NotFound("Fluxo de cadastro não encontrado.".to_string())
            })
    }

    async fn send_code(&self, email: &str, code: &str) -> Result<(), AppError> {
        let (subject, html) = verification_code_email(code, CODE_TTL_MINUTES);
        self.mailer.send(email, &subject, &html).await
    }
}

fn transition(status: SignupStatus, org_id: Option<Uuid>, db_schema: Option<String>) -> TransitionResponse {
    TransitionResponse {
        org_id,
        db_schema,
        ..TransitionResponse::of(status)
    }
}

fn unexpected_step(step: Step) -> AppError {
    AppError::InternalServerError(anyhow::anyhow!("Passo inesperado no fluxo de cadastro: {:?}", step))
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn profile_from(payload: &StartSignupPayload) -> CompanyProfile {
    CompanyProfile {
        company_name: non_empty(payload.company_name.as_deref()),
        country: non_empty(payload.country.as_deref()),
        address: non_empty(payload.address.as_deref()),
        phone: non_empty(payload.phone.as_deref()),
        size: non_empty(payload.size.as_deref()),
        sector: non_empty(payload.sector.as_deref()),
    }
}

fn profile_of(flow: &SignupFlow) -> CompanyProfile {
    CompanyProfile {
        company_name: flow.company_name.clone(),
        country: flow.country.clone(),
        address: flow.address.clone(),
        phone: flow.phone.clone(),
        size: flow.size.clone(),
        sector: flow.sector.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_profile_fields_become_none() {
        let payload = StartSignupPayload {
            email: "a@b.co".to_string(),
            password: "12345678".to_string(),
            company_name: Some("  Acme  ".to_string()),
            country: Some("   ".to_string()),
            address: None,
            phone: Some("".to_string()),
            size: None,
            sector: Some("events".to_string()),
            invite_token: None,
        };
        let profile = profile_from(&payload);
        assert_eq!(profile.company_name.as_deref(), Some("Acme"));
        assert_eq!(profile.country, None);
        assert_eq!(profile.phone, None);
        assert_eq!(profile.sector.as_deref(), Some("events"));
    }

    #[test]
    fn transition_keeps_next_step_in_sync() {
        let org_id = Uuid::new_v4();
        let response = transition(SignupStatus::PlanSelected, Some(org_id), None);
        assert_eq!(response.next_step, "/signup/provisioning");
        assert_eq!(response.org_id, Some(org_id));
    }
}
