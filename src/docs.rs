// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Signup ---
        handlers::signup::start,
        handlers::signup::status,
        handlers::signup::resend_code,
        handlers::signup::verify_code,
        handlers::signup::choose_plan,
        handlers::signup::provision_db,
        handlers::signup::list_plans,

        // --- Auth ---
        handlers::auth::login,

        // --- Users ---
        handlers::auth::get_me,

        // --- Invitations ---
        handlers::invitations::create_invitation,
        handlers::invitations::list_invitations,
        handlers::invitations::accept_invitation,

        // --- Sequences ---
        handlers::sequences::next_number,
    ),
    components(
        schemas(
            // --- Signup ---
            models::signup::SignupStatus,
            models::signup::StartSignupPayload,
            models::signup::FlowPayload,
            models::signup::VerifyCodePayload,
            models::signup::ChoosePlanPayload,
            models::signup::StartSignupResponse,
            models::signup::TransitionResponse,
            models::signup::ResendCodeResponse,
            models::signup::SignupStatusResponse,

            // --- Auth ---
            models::auth::User,
            models::auth::Role,
            models::auth::LoginUserPayload,
            models::auth::AuthResponse,

            // --- Tenancy ---
            models::tenancy::Plan,
            models::tenancy::Invitation,
            models::tenancy::CreateInvitationPayload,
            models::tenancy::AcceptInvitationPayload,
            handlers::invitations::AcceptInvitationResponse,

            // --- Sequences ---
            models::sequences::DocumentType,
            models::sequences::NextNumberPayload,
            models::sequences::NextNumberResponse,
        )
    ),
    tags(
        (name = "Signup", description = "Cadastro em etapas: código, plano e provisionamento"),
        (name = "Auth", description = "Autenticação"),
        (name = "Users", description = "Dados do Usuário"),
        (name = "Invitations", description = "Convites para entrar em uma organização"),
        (name = "Sequences", description = "Numeração de documentos por organização")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}
