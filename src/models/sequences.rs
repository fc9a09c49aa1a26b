// src/models/sequences.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::common::error::AppError;

// Tipos de documento numerados por organização.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Quote,
    Invoice,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Quote => "quote",
            DocumentType::Invoice => "invoice",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::Quote => "D",
            DocumentType::Invoice => "F",
        }
    }
}

impl FromStr for DocumentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quote" | "devis" => Ok(DocumentType::Quote),
            "invoice" | "facture" => Ok(DocumentType::Invoice),
            other => Err(AppError::Validation(format!(
                "Tipo de documento desconhecido: '{}'.",
                other
            ))),
        }
    }
}

// `type` fica como texto para que um tipo desconhecido vire erro de validação (400), não 422.
#[derive(Debug, Deserialize, ToSchema)]
pub struct NextNumberPayload {
    #[serde(rename = "type")]
    pub document_type: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextNumberResponse {
    pub number: String,
}
