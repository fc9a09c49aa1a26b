// src/services/email.rs

use std::time::Duration;

use async_trait::async_trait;

use crate::common::error::AppError;

/// Envio de e-mails transacionais. A escolha do provedor fica na configuração.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError>;
}

// ---
// Mailgun (API HTTP)
// ---
pub struct MailgunSender {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    base_url: String,
    sender: String,
}

impl MailgunSender {
    pub fn new(api_key: String, domain: String, base_url: String, sender: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let sender = sender
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Planify <postmaster@{}>", domain));

        Ok(Self {
            client,
            api_key,
            domain,
            base_url: base_url.trim_end_matches('/').to_string(),
            sender,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v3/{}/messages", self.base_url, self.domain)
    }
}

#[async_trait]
impl EmailSender for MailgunSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let form = [
            ("from", self.sender.as_str()),
            ("to", to),
            ("subject", subject),
            ("html", html),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("Mailgun inacessível: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(AppError::Dependency(format!("Mailgun ({}): {}", status, details)));
        }

        tracing::debug!(to, subject, "e-mail enviado via Mailgun");
        Ok(())
    }
}

// ---
// Ambiente local: só registra no log
// ---
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        tracing::info!(to, subject, "📧 e-mail (modo log)\n{}", html);
        Ok(())
    }
}

/// Sem provedor configurado: todo envio falha como dependência indisponível.
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, to: &str, _subject: &str, _html: &str) -> Result<(), AppError> {
        tracing::warn!(to, "envio de e-mail desabilitado");
        Err(AppError::Dependency("Nenhum provedor de e-mail configurado.".to_string()))
    }
}

// ---
// Modelos
// ---
fn wrap_template(title: &str, body: &str) -> String {
    format!(
        r#"<div style="font-family:Arial,sans-serif;line-height:1.5;color:#111827;">
  <h2 style="margin:0 0 12px;">{title}</h2>
  {body}
  <p style="margin-top:24px;color:#6B7280;font-size:12px;">Planify</p>
</div>"#
    )
}

pub fn verification_code_email(code: &str, ttl_minutes: i64) -> (String, String) {
    let body = format!(
        r#"<p>Votre code de verification :</p>
  <p style="font-size:24px;font-weight:bold" data-code="{code}">{code}</p>
  <p>Ce code expire dans {ttl_minutes} minutes.</p>"#
    );
    (
        "Votre code de verification Planify".to_string(),
        wrap_template("Confirmez votre email", &body),
    )
}

pub fn invitation_email(org_name: &str, link: &str) -> (String, String) {
    let body = format!(
        r#"<p>Vous avez ete invite a rejoindre <strong>{}</strong>.</p>
  <p><a href="{}">Accepter l'invitation</a></p>
  <p>Ce lien expire dans 7 jours.</p>"#,
        escape_html(org_name),
        link
    );
    ("Invitation Planify".to_string(), wrap_template("Invitation", &body))
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
