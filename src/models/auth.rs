// src/models/auth.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// Representa um usuário vindo do banco de dados
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,

    #[serde(skip_serializing)] // IMPORTANTE para segurança
    #[schema(ignore)]
    pub password_hash: String,

    pub name: String,
    pub role: String,
    pub email_verified: bool,
    pub org_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::normalize(&self.role)
    }
}

// ---
// Papéis dentro de uma organização, do menor para o maior.
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Papéis antigos ("dj", "technicien") viram "member"; desconhecidos viram "viewer".
    pub fn normalize(raw: &str) -> Role {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "member" | "dj" | "technicien" => Role::Member,
            _ => Role::Viewer,
        }
    }

    pub fn at_least(&self, required: Role) -> bool {
        *self >= required
    }
}

// Dados para login
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginUserPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    #[validate(length(min = 1, message = "A senha é obrigatória."))]
    pub password: String,
}

// Resposta de autenticação com o token
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
}

// Estrutura de dados ("claims") dentro do JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,  // Subject (ID do usuário)
    pub exp: usize, // Expiration time (quando o token expira)
    pub iat: usize, // Issued At (quando o token foi criado)
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn legacy_roles_map_to_member() {
        assert_eq!(Role::normalize("dj"), Role::Member);
        assert_eq!(Role::normalize(" Technicien "), Role::Member);
        assert_eq!(Role::normalize("ADMIN"), Role::Admin);
        assert_eq!(Role::normalize("owner"), Role::Viewer);
    }

    #[test]
    fn ranking_is_ordered() {
        assert!(Role::Admin.at_least(Role::Manager));
        assert!(Role::Member.at_least(Role::Viewer));
        assert!(!Role::Viewer.at_least(Role::Member));
    }
}
