//! Infraestrutura comum dos testes de integração.
//!
//! Os testes rodam contra um PostgreSQL real apontado por `TEST_DATABASE_URL`;
//! sem a variável, cada teste retorna cedo.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use onboarding_backend::{
    common::error::AppError,
    config::{AppState, EmailProvider, Settings},
    models::signup::{ChoosePlanPayload, StartSignupPayload, VerifyCodePayload},
    services::{email::EmailSender, tenant_router::RouterOptions},
};

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Guarda cada e-mail enviado; pode ser ligado para falhar.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent_to(&self, to: &str) -> Vec<SentEmail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }

    /// Código do último e-mail de verificação enviado para `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent_to(to)
            .iter()
            .rev()
            .find_map(|m| extract_between(&m.html, r#"data-code=""#, "\""))
    }

    /// Token do último convite enviado para `to`.
    pub fn last_invite_token_for(&self, to: &str) -> Option<String> {
        self.sent_to(to)
            .iter()
            .rev()
            .find_map(|m| extract_between(&m.html, "token=", "\""))
    }
}

fn extract_between(haystack: &str, start: &str, end: &str) -> Option<String> {
    let from = haystack.find(start)? + start.len();
    let len = haystack[from..].find(end)?;
    Some(haystack[from..from + len].to_string())
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("falha simulada".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

pub struct TestContext {
    pub pool: PgPool,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
}

impl TestContext {
    /// Chamado depois de `skip_if_no_db!`: com a variável definida, qualquer falha
    /// de conexão, migração ou bootstrap derruba o teste.
    pub async fn new() -> Self {
        let database_url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let pool = PgPool::connect(&database_url)
            .await
            .expect("failed to connect to TEST_DATABASE_URL");

        let settings = Settings {
            database_url,
            database_max_connections: 10,
            jwt_secret: "test-jwt-secret".to_string(),
            signup_code_secret: "test-code-secret".to_string(),
            invite_token_secret: "test-invite-secret".to_string(),
            app_url: "http://app.test".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            trusted_proxy_hops: 1,
            tenant_pool: RouterOptions::default(),
            email_provider: EmailProvider::Disabled,
            mailgun: None,
        };

        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::build(pool.clone(), settings, mailer.clone()).expect("failed to build AppState");
        state.bootstrap().await.expect("failed to bootstrap test database");

        Self { pool, state, mailer }
    }

    pub fn unique_email(&self, label: &str) -> String {
        format!("{}-{}@example.test", label, Uuid::new_v4().simple())
    }

    pub fn start_payload(&self, email: &str) -> StartSignupPayload {
        StartSignupPayload {
            email: email.to_string(),
            password: "s3nha-forte".to_string(),
            company_name: Some("Acme Eventos".to_string()),
            country: Some("FR".to_string()),
            address: None,
            phone: None,
            size: Some("1-10".to_string()),
            sector: Some("events".to_string()),
            invite_token: None,
        }
    }

    /// Fluxo self-serve completo até `completed`. Devolve (flow_id, org_id, schema).
    pub async fn complete_signup(&self, email: &str) -> (Uuid, Uuid, String) {
        let signup = &self.state.signup_service;

        let started = signup.start(self.start_payload(email), "127.0.0.1").await.unwrap();
        let code = self.mailer.last_code_for(email).unwrap();
        signup
            .verify_code(VerifyCodePayload { flow_id: started.flow_id, code }, "127.0.0.1")
            .await
            .unwrap();
        let planned = signup
            .choose_plan(
                ChoosePlanPayload { flow_id: started.flow_id, plan_code: "starter".to_string() },
                "127.0.0.1",
            )
            .await
            .unwrap();
        let provisioned = signup.provision(started.flow_id, "127.0.0.1").await.unwrap();

        (
            started.flow_id,
            planned.org_id.unwrap(),
            provisioned.db_schema.unwrap(),
        )
    }

    pub async fn drop_schema(&self, schema: &str) {
        let _ = sqlx::raw_sql(&format!(r#"DROP SCHEMA IF EXISTS "{}" CASCADE"#, schema))
            .execute(&self.pool)
            .await;
    }
}
