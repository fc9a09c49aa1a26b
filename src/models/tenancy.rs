// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// ---
// 1. Organization (o tenant)
// ---
// `db_schema` só muda uma vez: do fallback compartilhado para o schema provisionado.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub country: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub size: Option<String>,
    pub sector: Option<String>,
    pub created_by_user_id: Option<Uuid>,
    pub db_schema: Option<String>,
    #[serde(skip_serializing)]
    pub db_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---
// 2. Plan (catálogo, semeado na inicialização)
// ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub status: String,
    pub price_cents: i32,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Catálogo padrão: (código, nome).
pub const PLAN_DEFINITIONS: &[(&str, &str)] = &[
    ("starter", "Starter"),
    ("team", "Team"),
    ("business", "Business"),
];

// ---
// 3. OrgPlan (vínculo Organização <-> Plano)
// ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrgPlan {
    pub id: Uuid,
    pub org_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

// ---
// 4. Team / TeamMember
// ---
pub const DEFAULT_TEAM_NAME: &str = "Equipe principale";
pub const DEFAULT_TEAM_DESCRIPTION: &str = "Equipe par defaut";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// ---
// 5. Invitation
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub role: String,
    pub team_id: Option<Uuid>,
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub token_hash: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    pub accepted_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending.as_str()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn matches_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    pub role: Option<String>,
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AcceptInvitationPayload {
    #[validate(length(min = 1, message = "Token obrigatório."))]
    pub token: String,
}
