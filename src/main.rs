//src/main.rs

use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use onboarding_backend::{
    config::{AppState, Settings},
    routes,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Configuração e banco: se falhar, a aplicação não deve iniciar
    let settings = Settings::from_env()?;
    let db_pool = settings.connect().await?;
    let mailer = settings.email_sender()?;
    tracing::info!(provider = ?settings.email_provider, "provedor de e-mail configurado");

    let addr = settings.server_addr.clone();
    let app_state = AppState::build(db_pool, settings, mailer)?;
    app_state.bootstrap().await?;

    // Limpeza periódica das janelas de rate limit
    let limiter = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            if let Err(e) = limiter.purge().await {
                tracing::warn!(error = %e, "falha ao limpar rate limit");
            }
        }
    });

    let app = routes::app(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
