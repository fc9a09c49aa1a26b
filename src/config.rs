// src/config.rs

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::{AuditRepository, RateLimitRepository, SequenceRepository, TenantRepository, UserRepository},
    services::{
        audit::{AuditSink, PgAuditSink},
        auth::AuthService,
        email::{DisabledEmailSender, EmailSender, LogEmailSender, MailgunSender},
        invitation_service::InvitationService,
        organization_service::OrganizationService,
        provisioning_service::ProvisioningService,
        rate_limit::RateLimiter,
        sequence_service::SequenceService,
        signup_service::SignupService,
        tenant_router::{RouterOptions, TenantRouter},
        verification::{KeyedHasher, VerificationService},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailProvider {
    Mailgun,
    Log,
    Disabled,
}

impl EmailProvider {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "mailgun" => Ok(EmailProvider::Mailgun),
            "log" => Ok(EmailProvider::Log),
            "disabled" | "" => Ok(EmailProvider::Disabled),
            other => anyhow::bail!("EMAIL_PROVIDER desconhecido: '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailgunSettings {
    pub api_key: String,
    pub domain: String,
    pub base_url: String,
    pub sender: Option<String>,
}

/// Configuração lida do ambiente (e do `.env`, se existir).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub signup_code_secret: String,
    pub invite_token_secret: String,
    pub app_url: String,
    pub server_addr: String,
    /// Quantos proxies confiáveis acrescentam ao `X-Forwarded-For` (0 ignora o cabeçalho).
    pub trusted_proxy_hops: usize,
    pub tenant_pool: RouterOptions,
    pub email_provider: EmailProvider,
    pub mailgun: Option<MailgunSettings>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL deve ser definida")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET deve ser definido")?;

        // Segredos HMAC caem no segredo do JWT quando ausentes
        let signup_code_secret = optional("SIGNUP_CODE_SECRET").unwrap_or_else(|| jwt_secret.clone());
        let invite_token_secret = optional("INVITE_TOKEN_SECRET").unwrap_or_else(|| jwt_secret.clone());

        let defaults = RouterOptions::default();
        let tenant_pool = RouterOptions {
            max_connections: parse_or("TENANT_POOL_MAX_CONNECTIONS", defaults.max_connections)?,
            idle_secs: parse_or("TENANT_POOL_IDLE_SECS", defaults.idle_secs)?,
            max_cached_pools: defaults.max_cached_pools,
        };

        let email_provider = EmailProvider::parse(&optional("EMAIL_PROVIDER").unwrap_or_default())?;
        let mailgun = match (optional("MAILGUN_API_KEY"), optional("MAILGUN_DOMAIN")) {
            (Some(api_key), Some(domain)) => Some(MailgunSettings {
                api_key,
                domain,
                base_url: optional("MAILGUN_BASE_URL").unwrap_or_else(|| "https://api.mailgun.net".to_string()),
                sender: optional("MAILGUN_SENDER"),
            }),
            _ => None,
        };
        if email_provider == EmailProvider::Mailgun && mailgun.is_none() {
            anyhow::bail!("EMAIL_PROVIDER=mailgun exige MAILGUN_API_KEY e MAILGUN_DOMAIN");
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            jwt_secret,
            signup_code_secret,
            invite_token_secret,
            app_url: optional("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            server_addr: optional("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            trusted_proxy_hops: parse_or("TRUSTED_PROXY_HOPS", 1)?,
            tenant_pool,
            email_provider,
            mailgun,
        })
    }

    /// Pool principal (control plane). Conecta de verdade: falha aqui impede a subida.
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.database_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&self.database_url)
            .await
            .context("Falha ao conectar ao banco de dados")?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");
        Ok(pool)
    }

    /// Provedor de e-mail conforme `EMAIL_PROVIDER`.
    pub fn email_sender(&self) -> anyhow::Result<Arc<dyn EmailSender>> {
        let sender: Arc<dyn EmailSender> = match (&self.email_provider, &self.mailgun) {
            (EmailProvider::Mailgun, Some(mg)) => Arc::new(MailgunSender::new(
                mg.api_key.clone(),
                mg.domain.clone(),
                mg.base_url.clone(),
                mg.sender.clone(),
            )?),
            (EmailProvider::Log, _) => Arc::new(LogEmailSender),
            _ => Arc::new(DisabledEmailSender),
        };
        Ok(sender)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw.parse::<T>().with_context(|| format!("{} inválido: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub settings: Arc<Settings>,
    pub auth_service: AuthService,
    pub signup_service: SignupService,
    pub invitation_service: InvitationService,
    pub organization_service: OrganizationService,
    pub provisioning_service: ProvisioningService,
    pub sequence_service: SequenceService,
    pub tenant_router: TenantRouter,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Monta o gráfico de dependências sobre um pool já criado.
    pub fn build(db_pool: PgPool, settings: Settings, mailer: Arc<dyn EmailSender>) -> anyhow::Result<Self> {
        let user_repo = UserRepository::new(db_pool.clone());
        let tenant_repo = TenantRepository::new(db_pool.clone());

        let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(AuditRepository::new(db_pool.clone())));

        let auth_service = AuthService::new(user_repo.clone(), settings.jwt_secret.clone());
        let verification = VerificationService::new(&settings.signup_code_secret)?;
        let organization_service = OrganizationService::new(tenant_repo.clone(), user_repo);

        let tenant_router = TenantRouter::new(
            db_pool.clone(),
            &settings.database_url,
            tenant_repo,
            settings.tenant_pool.clone(),
        )?;
        let provisioning_service = ProvisioningService::new(db_pool.clone(), tenant_router.clone());

        let invitation_service = InvitationService::new(
            db_pool.clone(),
            organization_service.clone(),
            KeyedHasher::new(&settings.invite_token_secret)?,
            mailer.clone(),
            audit.clone(),
            settings.app_url.clone(),
        );

        let signup_service = SignupService::new(
            db_pool.clone(),
            auth_service.clone(),
            verification,
            organization_service.clone(),
            provisioning_service.clone(),
            invitation_service.clone(),
            mailer,
            audit,
        );

        let sequence_service = SequenceService::new(tenant_router.clone(), SequenceRepository::new());
        let rate_limiter = RateLimiter::new(RateLimitRepository::new(db_pool.clone()));

        Ok(Self {
            db_pool,
            settings: Arc::new(settings),
            auth_service,
            signup_service,
            invitation_service,
            organization_service,
            provisioning_service,
            sequence_service,
            tenant_router,
            rate_limiter,
        })
    }

    /// Passos de inicialização que dependem do banco: migrações, schema compartilhado e planos.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        sqlx::migrate!()
            .run(&self.db_pool)
            .await
            .context("Falha ao rodar as migrações do banco de dados.")?;
        tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

        let version = self.provisioning_service.ensure_shared_schema().await?;
        tracing::info!(version, "schema compartilhado pronto");

        self.organization_service.ensure_default_plans().await?;
        Ok(())
    }
}
