// src/services/audit.rs

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::db::AuditRepository;

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub org_id: Option<Uuid>,
    pub actor: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: &str, entity_type: &str, entity_id: Option<Uuid>) -> Self {
        Self {
            org_id: None,
            actor: None,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            ip_address: None,
            metadata: None,
        }
    }

    pub fn org(mut self, org_id: Option<Uuid>) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn actor(mut self, actor: Option<Uuid>) -> Self {
        self.actor = actor;
        self
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Registro de auditoria com melhor esforço: falhas nunca chegam ao chamador.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

pub struct PgAuditSink {
    repo: AuditRepository,
}

impl PgAuditSink {
    pub fn new(repo: AuditRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.repo.insert(&event).await {
            tracing::warn!(action = %event.action, error = %e, "falha ao gravar auditoria");
        }
    }
}
