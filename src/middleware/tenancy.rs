// src/middleware/tenancy.rs

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{common::error::AppError, config::AppState, models::auth::User};

// ---
// Organização do usuário autenticado
// ---
// Depende do `auth_guard` ter colocado o `User` nas extensions.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub org_id: Uuid,
    pub user: User,
}

impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<User>()
            .cloned()
            .ok_or(AppError::InvalidToken)?;

        let org_id = user.org_id.ok_or_else(|| {
            AppError::Forbidden("Usuário sem organização vinculada.".to_string())
        })?;

        Ok(OrgContext { org_id, user })
    }
}

// ---
// Endereço do cliente (para o rate limit e a auditoria)
// ---
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(ClientIp(client_ip_from(
            header("x-forwarded-for").as_deref(),
            header("x-real-ip").as_deref(),
            state.settings.trusted_proxy_hops,
        )))
    }
}

/// Endereço visto pelo proxy confiável mais externo.
///
/// Cada um dos `trusted_hops` proxies acrescenta um salto ao final do `X-Forwarded-For`;
/// o que vem antes disso foi escrito pelo próprio cliente e é ignorado. Com `0`, o cabeçalho
/// não é usado. Depois vem `X-Real-IP`, senão `unknown`.
pub fn client_ip_from(forwarded_for: Option<&str>, real_ip: Option<&str>, trusted_hops: usize) -> String {
    let hops: Vec<&str> = forwarded_for
        .filter(|_| trusted_hops > 0)
        .map(|v| v.split(',').map(str::trim).filter(|h| !h.is_empty()).collect())
        .unwrap_or_default();

    hops.len()
        .checked_sub(trusted_hops)
        .and_then(|i| hops.get(i))
        .or_else(|| hops.first())
        .copied()
        .or_else(|| real_ip.map(str::trim).filter(|v| !v.is_empty()))
        .unwrap_or("unknown")
        .to_string()
}
