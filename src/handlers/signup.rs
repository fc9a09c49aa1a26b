// src/handlers/signup.rs

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::ClientIp,
    models::{
        signup::{
            ChoosePlanPayload, FlowPayload, ResendCodeResponse, SignupStatusResponse, StartSignupPayload,
            StartSignupResponse, StatusQuery, TransitionResponse, VerifyCodePayload,
        },
        tenancy::Plan,
    },
    services::rate_limit::SignupOperation,
};

pub const FLOW_COOKIE: &str = "signup_flow_id";
const FLOW_COOKIE_DAYS: i64 = 7;

fn flow_cookie(flow_id: Uuid) -> Cookie<'static> {
    Cookie::build((FLOW_COOKIE, flow_id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::days(FLOW_COOKIE_DAYS))
        .build()
}

fn cleared_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((FLOW_COOKIE, "")).http_only(true).path("/").build();
    cookie.make_removal();
    cookie
}

fn cookie_flow_id(jar: &CookieJar) -> Option<Uuid> {
    jar.get(FLOW_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value().trim()).ok())
}

#[utoipa::path(
    post,
    path = "/api/signup/start",
    tag = "Signup",
    request_body = StartSignupPayload,
    responses(
        (status = 201, description = "Conta criada e código enviado", body = StartSignupResponse),
        (status = 400, description = "Dados inválidos ou convite inválido"),
        (status = 409, description = "E-mail já cadastrado"),
        (status = 410, description = "Convite expirado"),
        (status = 429, description = "Muitas requisições"),
        (status = 502, description = "Falha no envio do e-mail")
    )
)]
pub async fn start(
    State(app_state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(payload): Json<StartSignupPayload>,
) -> Result<impl IntoResponse, AppError> {
    app_state.rate_limiter.check(SignupOperation::Start, &ip).await?;

    let response = app_state.signup_service.start(payload, &ip).await?;
    let jar = jar.add(flow_cookie(response.flow_id));

    Ok((StatusCode::CREATED, jar, Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/signup/status",
    tag = "Signup",
    params(
        ("flowId" = Option<Uuid>, Query, description = "ID do fluxo; sem ele, usa o cookie da sessão")
    ),
    responses(
        (status = 200, description = "Status atual do fluxo", body = SignupStatusResponse)
    )
)]
pub async fn status(
    State(app_state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = app_state
        .signup_service
        .status(query.flow_id, cookie_flow_id(&jar))
        .await?;

    // Sempre devolve o Set-Cookie de remoção, mesmo sem cookie na requisição
    let jar = if outcome.clear_cookie {
        jar.add(cleared_cookie())
    } else {
        jar
    };

    Ok((jar, Json(outcome.response)))
}

#[utoipa::path(
    post,
    path = "/api/signup/resend-code",
    tag = "Signup",
    request_body = FlowPayload,
    responses(
        (status = 200, description = "Novo código enviado", body = ResendCodeResponse),
        (status = 404, description = "Fluxo não encontrado"),
        (status = 409, description = "E-mail já verificado"),
        (status = 429, description = "Cooldown ativo ou muitas requisições")
    )
)]
pub async fn resend_code(
    State(app_state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<FlowPayload>,
) -> Result<Json<ResendCodeResponse>, AppError> {
    app_state.rate_limiter.check(SignupOperation::Resend, &ip).await?;

    let response = app_state.signup_service.resend_code(payload.flow_id, &ip).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/signup/verify-code",
    tag = "Signup",
    request_body = VerifyCodePayload,
    responses(
        (status = 200, description = "E-mail verificado", body = TransitionResponse),
        (status = 400, description = "Código inválido"),
        (status = 404, description = "Fluxo não encontrado"),
        (status = 410, description = "Código ou convite expirado"),
        (status = 429, description = "Muitas tentativas")
    )
)]
pub async fn verify_code(
    State(app_state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<VerifyCodePayload>,
) -> Result<Json<TransitionResponse>, AppError> {
    app_state.rate_limiter.check(SignupOperation::Verify, &ip).await?;

    let response = app_state.signup_service.verify_code(payload, &ip).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/signup/choose-plan",
    tag = "Signup",
    request_body = ChoosePlanPayload,
    responses(
        (status = 200, description = "Organização criada com o plano", body = TransitionResponse),
        (status = 400, description = "E-mail ainda não verificado"),
        (status = 404, description = "Fluxo ou plano não encontrado"),
        (status = 409, description = "Fluxo convidado")
    )
)]
pub async fn choose_plan(
    State(app_state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<ChoosePlanPayload>,
) -> Result<Json<TransitionResponse>, AppError> {
    let response = app_state.signup_service.choose_plan(payload, &ip).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/signup/provision-db",
    tag = "Signup",
    request_body = FlowPayload,
    responses(
        (status = 200, description = "Schema da organização provisionado", body = TransitionResponse),
        (status = 400, description = "Plano ainda não escolhido"),
        (status = 404, description = "Fluxo não encontrado"),
        (status = 502, description = "Falha no provisionamento (pode tentar de novo)")
    )
)]
pub async fn provision_db(
    State(app_state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<FlowPayload>,
) -> Result<Json<TransitionResponse>, AppError> {
    let response = app_state.signup_service.provision(payload.flow_id, &ip).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/signup/plans",
    tag = "Signup",
    responses(
        (status = 200, description = "Catálogo de planos", body = Vec<Plan>)
    )
)]
pub async fn list_plans(State(app_state): State<AppState>) -> Result<Json<Vec<Plan>>, AppError> {
    let plans = app_state.organization_service.list_plans().await?;
    Ok(Json(plans))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_cookie_is_http_only_for_a_week() {
        let id = Uuid::new_v4();
        let cookie = flow_cookie(id);
        assert_eq!(cookie.name(), FLOW_COOKIE);
        assert_eq!(cookie.value(), id.to_string());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(7)));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let cookie = cleared_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }

    #[test]
    fn malformed_cookie_is_ignored() {
        let jar = CookieJar::new().add(Cookie::new(FLOW_COOKIE, "not-a-uuid"));
        assert_eq!(cookie_flow_id(&jar), None);
    }
}
