// src/routes.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::AppState, docs::ApiDoc, handlers, middleware::auth::auth_guard};

/// Router completo da API, já com o estado.
pub fn app(app_state: AppState) -> Router {
    // Cadastro (público, com rate limit por endereço nos handlers)
    let signup_routes = Router::new()
        .route("/start", post(handlers::signup::start))
        .route("/status", get(handlers::signup::status))
        .route("/plans", get(handlers::signup::list_plans))
        .route("/resend-code", post(handlers::signup::resend_code))
        .route("/verify-code", post(handlers::signup::verify_code))
        .route("/choose-plan", post(handlers::signup::choose_plan))
        .route("/provision-db", post(handlers::signup::provision_db));

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth::login));

    // Rotas protegidas pelo middleware
    let user_routes = Router::new()
        .route("/me", get(handlers::auth::get_me))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    let invitation_routes = Router::new()
        .route("/"
               ,post(handlers::invitations::create_invitation)
               .get(handlers::invitations::list_invitations)
        )
        .route("/accept", post(handlers::invitations::accept_invitation))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    let sequence_routes = Router::new()
        .route("/next", post(handlers::sequences::next_number))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/signup", signup_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .nest("/api/invitations", invitation_routes)
        .nest("/api/sequences", sequence_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
