use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// Taxonomia de erros do núcleo de onboarding.
// Validação, NotFound, Conflito, Expirado e RateLimited são recuperáveis pelo usuário
// e voltam com mensagem acionável. Dependências (banco, e-mail) viram 500/502 sem detalhes internos.
#[derive(Debug, Error)]
pub enum AppError {
    // --- Validação ---
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Validation(String),

    // --- Não encontrado ---
    #[error("{0}")]
    NotFound(String),

    // --- Conflito ---
    #[error("E-mail já existe")]
    EmailAlreadyExists,

    #[error("{0}")]
    Conflict(String),

    // --- Expirado ---
    #[error("Código expirado")]
    CodeExpired,

    #[error("Convite expirado")]
    InvitationExpired,

    // --- Controle de tentativas ---
    #[error("Código inválido")]
    InvalidCode { attempts_remaining: i32 },

    #[error("Muitas tentativas")]
    TooManyAttempts,

    #[error("Cooldown ativo")]
    CooldownActive { seconds_remaining: i64 },

    #[error("Limite de requisições excedido")]
    RateLimited { retry_after_secs: i64 },

    // --- Autenticação ---
    #[error("Credenciais inválidas")]
    InvalidCredentials,

    #[error("Token inválido")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    // --- Dependências ---
    #[error("Erro de banco de dados: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Falha de dependência: {0}")]
    Dependency(String),

    #[error("Erro interno do servidor: {0}")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Erro de Bcrypt: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    /// Categoria estável usada pelos clientes (e pelos testes) para reagir ao erro.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::EmailAlreadyExists | AppError::Conflict(_) => "conflict",
            AppError::CodeExpired | AppError::InvitationExpired => "expired",
            AppError::InvalidCode { .. } => "invalid_code",
            AppError::TooManyAttempts => "too_many_attempts",
            AppError::CooldownActive { .. } => "cooldown_active",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::InvalidCredentials | AppError::InvalidToken => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::DatabaseError(_)
            | AppError::Dependency(_)
            | AppError::InternalServerError(_)
            | AppError::BcryptError(_)
            | AppError::JwtError(_) => "dependency",
        }
    }

    /// Converte violações de unicidade em conflito; o resto continua erro de banco.
    pub fn from_unique_violation(e: sqlx::Error, conflict: AppError) -> AppError {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation() {
                return conflict;
            }
        }
        AppError::DatabaseError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let (status, body) = match &self {
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "error": "Um ou mais campos são inválidos.",
                        "kind": kind,
                        "details": details,
                    }),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg, "kind": kind })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg, "kind": kind })),
            AppError::EmailAlreadyExists => (
                StatusCode::CONFLICT,
                json!({ "error": "Este e-mail já está em uso.", "kind": kind }),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg, "kind": kind })),
            AppError::CodeExpired => (
                StatusCode::GONE,
                json!({ "error": "Código expirado. Solicite um novo código.", "kind": kind }),
            ),
            AppError::InvitationExpired => (
                StatusCode::GONE,
                json!({ "error": "Convite expirado.", "kind": kind }),
            ),
            AppError::InvalidCode { attempts_remaining } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Código inválido.",
                    "kind": kind,
                    "attemptsRemaining": attempts_remaining,
                }),
            ),
            AppError::TooManyAttempts => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Muitas tentativas. Solicite um novo código.", "kind": kind }),
            ),
            AppError::CooldownActive { seconds_remaining } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Aguarde antes de pedir um novo código.",
                    "kind": kind,
                    "cooldownSeconds": seconds_remaining,
                }),
            ),
            AppError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Muitas requisições. Tente novamente mais tarde.",
                    "kind": kind,
                    "retryAfter": retry_after_secs,
                }),
            ),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "E-mail ou senha inválidos.", "kind": kind }),
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Token de autenticação inválido ou ausente.", "kind": kind }),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg, "kind": kind })),
            AppError::Dependency(_) => {
                tracing::error!("Falha de dependência: {}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "Um serviço externo falhou. Tente novamente.", "kind": kind }),
                )
            }
            // Banco, bcrypt, JWT e anyhow viram 500. O detalhe fica só no log.
            e => {
                tracing::error!("Erro Interno do Servidor: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Ocorreu um erro inesperado.", "kind": kind }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();

        let retry_after = match &self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            AppError::CooldownActive { seconds_remaining } => Some(*seconds_remaining),
            _ => None,
        };
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
