// src/services/verification.rs

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CODE_TTL_MINUTES: i64 = 10;
pub const RESEND_COOLDOWN_SECONDS: i64 = 60;
pub const MAX_ATTEMPTS: i32 = 5;

/// HMAC-SHA256 com chave do servidor, em hex. Usado para códigos e tokens de convite.
#[derive(Clone)]
pub struct KeyedHasher {
    mac: HmacSha256,
}

impl KeyedHasher {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Chave HMAC inválida: {}", e))?;
        Ok(Self { mac })
    }

    pub fn hash(&self, value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Comparação em tempo constante contra um hash em hex.
    pub fn verify(&self, value: &str, stored_hash: &str) -> bool {
        let Ok(expected) = hex::decode(stored_hash) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Gera, protege e confere os códigos de verificação de e-mail.
/// O código em claro só existe na memória e no e-mail; o banco guarda apenas o HMAC.
#[derive(Clone)]
pub struct VerificationService {
    hasher: KeyedHasher,
}

impl VerificationService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        Ok(Self { hasher: KeyedHasher::new(secret)? })
    }

    /// Código numérico de 6 dígitos, uniforme em 100000..=999999.
    pub fn generate_code(&self) -> String {
        rand::thread_rng().gen_range(100_000..=999_999).to_string()
    }

    pub fn hash_code(&self, code: &str) -> String {
        self.hasher.hash(code)
    }

    pub fn verify_code(&self, code: &str, stored_hash: &str) -> bool {
        self.hasher.verify(code.trim(), stored_hash)
    }

    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(CODE_TTL_MINUTES)
    }

    pub fn resend_available_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(RESEND_COOLDOWN_SECONDS)
    }
}

/// Segundos restantes até `available_at`, arredondado para cima. Zero quando já liberado.
pub fn seconds_until(available_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match available_at {
        Some(at) if at > now => {
            let millis = (at - now).num_milliseconds();
            (millis + 999) / 1000
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> VerificationService {
        VerificationService::new("segredo-de-teste").unwrap()
    }

    #[test]
    fn generated_codes_have_six_digits() {
        let svc = service();
        for _ in 0..200 {
            let code = svc.generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn hash_is_deterministic_and_never_the_code() {
        let svc = service();
        let h1 = svc.hash_code("123456");
        assert_eq!(h1, svc.hash_code("123456"));
        assert_ne!(h1, "123456");
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn verify_accepts_only_the_right_code() {
        let svc = service();
        let stored = svc.hash_code("654321");
        assert!(svc.verify_code("654321", &stored));
        assert!(svc.verify_code(" 654321 ", &stored));
        assert!(!svc.verify_code("654320", &stored));
        assert!(!svc.verify_code("654321", "nao-e-hex"));
    }

    #[test]
    fn secret_changes_the_hash() {
        let other = VerificationService::new("outro").unwrap();
        assert_ne!(service().hash_code("111111"), other.hash_code("111111"));
    }

    #[test]
    fn cooldown_rounds_up() {
        let now = Utc::now();
        assert_eq!(seconds_until(None, now), 0);
        assert_eq!(seconds_until(Some(now - Duration::seconds(5)), now), 0);
        assert_eq!(seconds_until(Some(now + Duration::milliseconds(1500)), now), 2);
        assert_eq!(seconds_until(Some(now + Duration::seconds(60)), now), 60);
    }
}
