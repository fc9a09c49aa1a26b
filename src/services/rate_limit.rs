// src/services/rate_limit.rs

use chrono::{DateTime, Utc};

use crate::{common::error::AppError, db::RateLimitRepository};

const WINDOW_SECONDS: f64 = 60.0;

/// Operações públicas do cadastro com orçamento próprio por endereço de cliente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOperation {
    Start,
    Resend,
    Verify,
}

impl SignupOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignupOperation::Start => "start",
            SignupOperation::Resend => "resend",
            SignupOperation::Verify => "verify",
        }
    }

    /// Requisições permitidas por janela de 60 segundos.
    pub fn budget(&self) -> i32 {
        match self {
            SignupOperation::Start => 5,
            SignupOperation::Resend => 5,
            SignupOperation::Verify => 10,
        }
    }

    pub fn key(&self, client_ip: &str) -> String {
        format!("signup:{}:{}", self.as_str(), client_ip)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    repo: RateLimitRepository,
}

impl RateLimiter {
    pub fn new(repo: RateLimitRepository) -> Self {
        Self { repo }
    }

    pub async fn check(&self, operation: SignupOperation, client_ip: &str) -> Result<(), AppError> {
        let key = operation.key(client_ip);
        let (count, reset_at) = self.repo.hit(&key, WINDOW_SECONDS).await?;
        let verdict = evaluate(count, operation.budget(), reset_at, Utc::now());
        if verdict.is_err() {
            tracing::warn!(key = %key, count, "rate limit excedido");
        }
        verdict
    }

    /// Limpeza periódica das janelas vencidas.
    pub async fn purge(&self) -> Result<u64, AppError> {
        self.repo.purge_expired(WINDOW_SECONDS).await
    }
}

/// Decide sobre a contagem já registrada. Falha fechada acima do orçamento.
pub fn evaluate(count: i32, budget: i32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
    if count <= budget {
        return Ok(());
    }
    let millis = (reset_at - now).num_milliseconds().max(0);
    Err(AppError::RateLimited {
        retry_after_secs: ((millis + 999) / 1000).max(1),
    })
}
