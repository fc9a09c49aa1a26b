// src/models/signup.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// ---
// Estados do fluxo de cadastro
// ---
// draft -> code_sent -> verified -> plan_selected -> provisioning -> completed
// code_sent -> expired (prazo do código) | code_sent -> completed (convite)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignupStatus {
    Draft,
    CodeSent,
    Verified,
    PlanSelected,
    Provisioning,
    Completed,
    Expired,
}

impl SignupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignupStatus::Draft => "draft",
            SignupStatus::CodeSent => "code_sent",
            SignupStatus::Verified => "verified",
            SignupStatus::PlanSelected => "plan_selected",
            SignupStatus::Provisioning => "provisioning",
            SignupStatus::Completed => "completed",
            SignupStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<SignupStatus> {
        let status = match raw {
            "draft" => SignupStatus::Draft,
            "code_sent" => SignupStatus::CodeSent,
            "verified" => SignupStatus::Verified,
            "plan_selected" => SignupStatus::PlanSelected,
            "provisioning" => SignupStatus::Provisioning,
            "completed" => SignupStatus::Completed,
            "expired" => SignupStatus::Expired,
            _ => return None,
        };
        Some(status)
    }

    /// Próxima tela do cliente. Função pura do status.
    pub fn next_step(&self) -> &'static str {
        match self {
            SignupStatus::Draft | SignupStatus::CodeSent => "/signup/verify",
            SignupStatus::Verified => "/signup/plan",
            SignupStatus::PlanSelected | SignupStatus::Provisioning => "/signup/provisioning",
            SignupStatus::Completed => "/signup/success",
            SignupStatus::Expired => "/signup",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SignupStatus::Completed | SignupStatus::Expired)
    }

    /// Antes da verificação do e-mail (onde reenviar código ainda faz sentido).
    pub fn is_before_verification(&self) -> bool {
        matches!(
            self,
            SignupStatus::Draft | SignupStatus::CodeSent | SignupStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Pending,
    Success,
    Failed,
}

impl ProvisioningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Pending => "pending",
            ProvisioningStatus::Success => "success",
            ProvisioningStatus::Failed => "failed",
        }
    }
}

// ---
// Intenção do fluxo, fixada na criação.
// ---
// Um fluxo convidado já nasce ligado à organização do convite e pula plano/provisionamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowIntent {
    SelfServe,
    Invited { org_id: Uuid, invitation_id: Uuid },
}

// ---
// SignupFlow (linha de `signup_flows`)
// ---
#[derive(Debug, Clone, FromRow)]
pub struct SignupFlow {
    pub id: Uuid,
    pub email: String,
    pub user_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub invitation_id: Option<Uuid>,
    pub company_name: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub size: Option<String>,
    pub sector: Option<String>,
    pub status: String,
    pub code_hash: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub attempts_count: i32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub resend_available_at: Option<DateTime<Utc>>,
    pub plan_id: Option<Uuid>,
    pub provisioning_status: String,
    pub db_schema: Option<String>,
    pub db_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SignupFlow {
    /// O status gravado; valores desconhecidos são tratados como rascunho.
    pub fn status(&self) -> SignupStatus {
        SignupStatus::parse(&self.status).unwrap_or(SignupStatus::Draft)
    }

    pub fn intent(&self) -> FlowIntent {
        match (self.invitation_id, self.org_id) {
            (Some(invitation_id), Some(org_id)) => FlowIntent::Invited { org_id, invitation_id },
            _ => FlowIntent::SelfServe,
        }
    }

    pub fn is_code_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.code_expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Dados para inserir um novo fluxo já em `code_sent`.
#[derive(Debug, Clone)]
pub struct NewSignupFlow {
    pub email: String,
    pub user_id: Uuid,
    pub intent: FlowIntent,
    pub profile: CompanyProfile,
    pub code_hash: String,
    pub code_expires_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyProfile {
    pub company_name: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub size: Option<String>,
    pub sector: Option<String>,
}

// ---
// Payloads da API
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSignupPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    #[validate(length(min = 8, message = "A senha deve ter no mínimo 8 caracteres."))]
    pub password: String,
    pub company_name: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    #[validate(length(max = 32, message = "Telefone muito longo."))]
    pub phone: Option<String>,
    pub size: Option<String>,
    pub sector: Option<String>,
    pub invite_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowPayload {
    pub flow_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodePayload {
    pub flow_id: Uuid,
    #[validate(length(min = 1, message = "Código obrigatório."))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChoosePlanPayload {
    pub flow_id: Uuid,
    #[validate(length(min = 1, message = "Plano obrigatório."))]
    pub plan_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub flow_id: Option<Uuid>,
}

// ---
// Respostas
// ---
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSignupResponse {
    pub flow_id: Uuid,
    pub status: SignupStatus,
    pub next_step: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub status: SignupStatus,
    pub next_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_schema: Option<String>,
}

impl TransitionResponse {
    pub fn of(status: SignupStatus) -> Self {
        Self {
            status,
            next_step: status.next_step().to_string(),
            org_id: None,
            db_schema: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResendCodeResponse {
    pub status: SignupStatus,
    pub cooldown_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupStatusResponse {
    pub flow_id: Option<Uuid>,
    pub status: SignupStatus,
    pub next_step: String,
    pub email: Option<String>,
    pub org_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub provisioning_status: Option<String>,
    pub resend_available_at: Option<DateTime<Utc>>,
    pub attempts_count: Option<i32>,
}

impl SignupStatusResponse {
    /// Resposta para "nenhum fluxo visível": volta ao início do cadastro.
    pub fn draft() -> Self {
        Self {
            flow_id: None,
            status: SignupStatus::Draft,
            next_step: "/signup".to_string(),
            email: None,
            org_id: None,
            plan_id: None,
            provisioning_status: None,
            resend_available_at: None,
            attempts_count: None,
        }
    }

    pub fn of(flow: &SignupFlow, status: SignupStatus) -> Self {
        Self {
            flow_id: Some(flow.id),
            status,
            next_step: status.next_step().to_string(),
            email: Some(flow.email.clone()),
            org_id: flow.org_id,
            plan_id: flow.plan_id,
            provisioning_status: Some(flow.provisioning_status.clone()),
            resend_available_at: flow.resend_available_at,
            attempts_count: Some(flow.attempts_count),
        }
    }
}
