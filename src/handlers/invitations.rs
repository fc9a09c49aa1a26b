// src/handlers/invitations.rs

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::{
        auth::{require_admin, AuthenticatedUser},
        tenancy::{ClientIp, OrgContext},
    },
    models::tenancy::{AcceptInvitationPayload, CreateInvitationPayload, Invitation},
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationResponse {
    pub org_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/invitations",
    tag = "Invitations",
    request_body = CreateInvitationPayload,
    responses(
        (status = 201, description = "Convite criado e enviado", body = Invitation),
        (status = 403, description = "Apenas administradores"),
        (status = 409, description = "Já existe convite pendente para o e-mail"),
        (status = 502, description = "Falha no envio do e-mail")
    ),
    security(
        ("api_jwt" = [])
    )
)]
pub async fn create_invitation(
    State(app_state): State<AppState>,
    org: OrgContext,
    ClientIp(ip): ClientIp,
    Json(payload): Json<CreateInvitationPayload>,
) -> Result<impl IntoResponse, AppError> {
    // 1. Validar
    payload.validate()?;
    require_admin(&org.user)?;

    // 2. Criar e enviar
    let invitation = app_state
        .invitation_service
        .create(&org.user, org.org_id, &payload, &ip)
        .await?;

    Ok((StatusCode::CREATED, Json(invitation)))
}

#[utoipa::path(
    get,
    path = "/api/invitations",
    tag = "Invitations",
    responses(
        (status = 200, description = "Convites da organização", body = Vec<Invitation>),
        (status = 403, description = "Apenas administradores")
    ),
    security(
        ("api_jwt" = [])
    )
)]
pub async fn list_invitations(
    State(app_state): State<AppState>,
    org: OrgContext,
) -> Result<Json<Vec<Invitation>>, AppError> {
    require_admin(&org.user)?;
    let invitations = app_state.invitation_service.list(org.org_id).await?;
    Ok(Json(invitations))
}

#[utoipa::path(
    post,
    path = "/api/invitations/accept",
    tag = "Invitations",
    request_body = AcceptInvitationPayload,
    responses(
        (status = 200, description = "Usuário entrou na organização", body = AcceptInvitationResponse),
        (status = 400, description = "Convite inválido ou de outro e-mail"),
        (status = 409, description = "Usuário já vinculado a outra organização"),
        (status = 410, description = "Convite expirado")
    ),
    security(
        ("api_jwt" = [])
    )
)]
pub async fn accept_invitation(
    State(app_state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ClientIp(ip): ClientIp,
    Json(payload): Json<AcceptInvitationPayload>,
) -> Result<Json<AcceptInvitationResponse>, AppError> {
    payload.validate()?;
    let org_id = app_state
        .invitation_service
        .accept(&user, &payload.token, &ip)
        .await?;
    Ok(Json(AcceptInvitationResponse { org_id }))
}
