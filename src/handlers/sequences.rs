// src/handlers/sequences.rs

use axum::{extract::State, Json};

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::OrgContext,
    models::sequences::{DocumentType, NextNumberPayload, NextNumberResponse},
};

#[utoipa::path(
    post,
    path = "/api/sequences/next",
    tag = "Sequences",
    request_body = NextNumberPayload,
    responses(
        (status = 200, description = "Próximo número do documento", body = NextNumberResponse),
        (status = 400, description = "Tipo de documento desconhecido"),
        (status = 401, description = "Não autorizado"),
        (status = 403, description = "Usuário sem organização")
    ),
    security(
        ("api_jwt" = [])
    )
)]
pub async fn next_number(
    State(app_state): State<AppState>,
    org: OrgContext,
    Json(payload): Json<NextNumberPayload>,
) -> Result<Json<NextNumberResponse>, AppError> {
    let document_type: DocumentType = payload.document_type.parse()?;

    let number = app_state
        .sequence_service
        .next_document_number(org.org_id, document_type)
        .await?;

    Ok(Json(NextNumberResponse { number }))
}
