// src/services/signup_flow.rs
//
// Regras de transição do fluxo de cadastro, sem I/O.
// O orquestrador (`signup_service`) lê o fluxo travado, pergunta a `decide` o que fazer
// e só então executa o passo devolvido. Pré-condição falha = erro, status intacto.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::signup::{FlowIntent, SignupFlow, SignupStatus},
    services::verification::{seconds_until, MAX_ATTEMPTS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `code_matches` já vem calculado (comparação em tempo constante).
    Verify { code_matches: bool },
    Resend,
    ChoosePlan,
    Provision,
    Observe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nada a fazer: a operação já aconteceu. Responde com o status atual.
    AlreadyDone(SignupStatus),
    /// Grava `expired` e responde `CodeExpired`.
    ExpireCode,
    /// Incrementa as tentativas e responde `InvalidCode`.
    RejectCode { attempts_remaining: i32 },
    /// Fluxo convidado: entra na organização do convite e conclui.
    JoinOrganization { org_id: Uuid, invitation_id: Uuid },
    MarkVerified,
    IssueNewCode,
    CreateOrganization,
    Provision { org_id: Uuid },
    /// Leitura de status que encontrou um código vencido.
    LazyExpire,
    Report(SignupStatus),
}

pub fn decide(flow: &SignupFlow, command: Command, now: DateTime<Utc>) -> Result<Step, AppError> {
    let status = flow.status();

    match command {
        Command::Verify { code_matches } => decide_verify(flow, status, code_matches, now),
        Command::Resend => {
            if !status.is_before_verification() {
                return Err(AppError::Conflict("E-mail já verificado.".to_string()));
            }
            let seconds_remaining = seconds_until(flow.resend_available_at, now);
            if seconds_remaining > 0 {
                return Err(AppError::CooldownActive { seconds_remaining });
            }
            Ok(Step::IssueNewCode)
        }
        Command::ChoosePlan => {
            if let FlowIntent::Invited { .. } = flow.intent() {
                return Err(AppError::Conflict(
                    "Convite já vinculado a uma organização.".to_string(),
                ));
            }
            match status {
                SignupStatus::PlanSelected | SignupStatus::Provisioning | SignupStatus::Completed
                    if flow.org_id.is_some() =>
                {
                    Ok(Step::AlreadyDone(status))
                }
                SignupStatus::Verified => {
                    if flow.user_id.is_none() {
                        return Err(AppError::Validation("Usuário ausente no fluxo.".to_string()));
                    }
                    Ok(Step::CreateOrganization)
                }
                _ => Err(AppError::Validation("Verificação de e-mail obrigatória.".to_string())),
            }
        }
        Command::Provision => match status {
            SignupStatus::Completed => Ok(Step::AlreadyDone(SignupStatus::Completed)),
            SignupStatus::PlanSelected | SignupStatus::Provisioning => match flow.org_id {
                Some(org_id) => Ok(Step::Provision { org_id }),
                None => Err(AppError::Validation("Organização ausente no fluxo.".to_string())),
            },
            _ => Err(AppError::Validation("Escolha um plano antes de provisionar.".to_string())),
        },
        Command::Observe => {
            if status == SignupStatus::CodeSent && flow.is_code_expired_at(now) {
                Ok(Step::LazyExpire)
            } else {
                Ok(Step::Report(status))
            }
        }
    }
}

fn decide_verify(
    flow: &SignupFlow,
    status: SignupStatus,
    code_matches: bool,
    now: DateTime<Utc>,
) -> Result<Step, AppError> {
    match status {
        SignupStatus::Completed => return Ok(Step::AlreadyDone(status)),
        SignupStatus::Expired => return Ok(Step::ExpireCode),
        SignupStatus::Verified | SignupStatus::PlanSelected | SignupStatus::Provisioning => {
            return Ok(Step::AlreadyDone(status));
        }
        SignupStatus::Draft => {
            return Err(AppError::Validation("Nenhum código enviado para este fluxo.".to_string()));
        }
        SignupStatus::CodeSent => {}
    }

    if flow.is_code_expired_at(now) {
        return Ok(Step::ExpireCode);
    }
    if flow.attempts_count >= MAX_ATTEMPTS {
        return Err(AppError::TooManyAttempts);
    }
    if !code_matches {
        return Ok(Step::RejectCode {
            attempts_remaining: (MAX_ATTEMPTS - flow.attempts_count - 1).max(0),
        });
    }

    match flow.intent() {
        FlowIntent::Invited { org_id, invitation_id } => Ok(Step::JoinOrganization { org_id, invitation_id }),
        FlowIntent::SelfServe => Ok(Step::MarkVerified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Posição do status no caminho feliz. `expired` fica fora da ordem (é terminal).
    fn rank(status: SignupStatus) -> Option<u8> {
        match status {
            SignupStatus::Draft => Some(0),
            SignupStatus::CodeSent => Some(1),
            SignupStatus::Verified => Some(2),
            SignupStatus::PlanSelected => Some(3),
            SignupStatus::Provisioning => Some(4),
            SignupStatus::Completed => Some(5),
            SignupStatus::Expired => None,
        }
    }

    /// Status resultante de um passo bem-sucedido, quando o passo muda o status.
    fn target_status(step: Step) -> Option<SignupStatus> {
        match step {
            Step::ExpireCode | Step::LazyExpire => Some(SignupStatus::Expired),
            Step::JoinOrganization { .. } => Some(SignupStatus::Completed),
            Step::MarkVerified => Some(SignupStatus::Verified),
            Step::IssueNewCode => Some(SignupStatus::CodeSent),
            Step::CreateOrganization => Some(SignupStatus::PlanSelected),
            Step::Provision { .. } => Some(SignupStatus::Completed),
            Step::AlreadyDone(_) | Step::RejectCode { .. } | Step::Report(_) => None,
        }
    }

    const ALL: [SignupStatus; 7] = [
        SignupStatus::Draft,
        SignupStatus::CodeSent,
        SignupStatus::Verified,
        SignupStatus::PlanSelected,
        SignupStatus::Provisioning,
        SignupStatus::Completed,
        SignupStatus::Expired,
    ];

    fn flow(status: SignupStatus) -> SignupFlow {
        let now = Utc::now();
        SignupFlow {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            user_id: Some(Uuid::new_v4()),
            org_id: None,
            invitation_id: None,
            company_name: Some("Acme".to_string()),
            country: Some("FR".to_string()),
            address: None,
            phone: None,
            size: None,
            sector: None,
            status: status.as_str().to_string(),
            code_hash: Some("ab".repeat(32)),
            code_expires_at: Some(now + Duration::minutes(10)),
            attempts_count: 0,
            last_sent_at: Some(now),
            resend_available_at: Some(now + Duration::seconds(60)),
            plan_id: None,
            provisioning_status: "pending".to_string(),
            db_schema: None,
            db_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invited(mut f: SignupFlow) -> SignupFlow {
        f.org_id = Some(Uuid::new_v4());
        f.invitation_id = Some(Uuid::new_v4());
        f
    }

    #[test]
    fn matching_code_verifies_self_serve_flow() {
        let f = flow(SignupStatus::CodeSent);
        let step = decide(&f, Command::Verify { code_matches: true }, Utc::now()).unwrap();
        assert_eq!(step, Step::MarkVerified);
    }

    #[test]
    fn matching_code_completes_invited_flow() {
        let f = invited(flow(SignupStatus::CodeSent));
        let step = decide(&f, Command::Verify { code_matches: true }, Utc::now()).unwrap();
        assert_eq!(
            step,
            Step::JoinOrganization {
                org_id: f.org_id.unwrap(),
                invitation_id: f.invitation_id.unwrap()
            }
        );
    }

    #[test]
    fn wrong_code_reports_remaining_attempts() {
        let mut f = flow(SignupStatus::CodeSent);
        f.attempts_count = 3;
        let step = decide(&f, Command::Verify { code_matches: false }, Utc::now()).unwrap();
        assert_eq!(step, Step::RejectCode { attempts_remaining: 1 });
    }

    #[test]
    fn ceiling_blocks_even_the_right_code() {
        let mut f = flow(SignupStatus::CodeSent);
        f.attempts_count = MAX_ATTEMPTS;
        let err = decide(&f, Command::Verify { code_matches: true }, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::TooManyAttempts));
    }

    #[test]
    fn expiry_wins_over_attempt_ceiling() {
        let mut f = flow(SignupStatus::CodeSent);
        f.attempts_count = MAX_ATTEMPTS;
        let later = Utc::now() + Duration::minutes(11);
        let step = decide(&f, Command::Verify { code_matches: true }, later).unwrap();
        assert_eq!(step, Step::ExpireCode);
    }

    #[test]
    fn expired_flow_never_verifies() {
        let f = flow(SignupStatus::Expired);
        for matches in [true, false] {
            let step = decide(&f, Command::Verify { code_matches: matches }, Utc::now()).unwrap();
            assert_eq!(step, Step::ExpireCode);
        }
    }

    #[test]
    fn completed_verify_is_idempotent() {
        let f = invited(flow(SignupStatus::Completed));
        let step = decide(&f, Command::Verify { code_matches: false }, Utc::now()).unwrap();
        assert_eq!(step, Step::AlreadyDone(SignupStatus::Completed));
    }

    #[test]
    fn resend_respects_cooldown_and_phase() {
        let now = Utc::now();
        let f = flow(SignupStatus::CodeSent);
        match decide(&f, Command::Resend, now).unwrap_err() {
            AppError::CooldownActive { seconds_remaining } => assert!(seconds_remaining > 0),
            other => panic!("erro inesperado: {other:?}"),
        }

        let later = now + Duration::seconds(61);
        assert_eq!(decide(&f, Command::Resend, later).unwrap(), Step::IssueNewCode);

        let expired = flow(SignupStatus::Expired);
        assert_eq!(decide(&expired, Command::Resend, later).unwrap(), Step::IssueNewCode);

        let verified = flow(SignupStatus::Verified);
        assert!(matches!(decide(&verified, Command::Resend, later), Err(AppError::Conflict(_))));
    }

    #[test]
    fn choose_plan_requires_verification_and_self_serve() {
        let now = Utc::now();
        assert_eq!(
            decide(&flow(SignupStatus::Verified), Command::ChoosePlan, now).unwrap(),
            Step::CreateOrganization
        );
        assert!(matches!(
            decide(&flow(SignupStatus::CodeSent), Command::ChoosePlan, now),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            decide(&invited(flow(SignupStatus::Verified)), Command::ChoosePlan, now),
            Err(AppError::Conflict(_))
        ));

        let mut no_user = flow(SignupStatus::Verified);
        no_user.user_id = None;
        assert!(matches!(decide(&no_user, Command::ChoosePlan, now), Err(AppError::Validation(_))));

        let mut chosen = flow(SignupStatus::PlanSelected);
        chosen.org_id = Some(Uuid::new_v4());
        assert_eq!(
            decide(&chosen, Command::ChoosePlan, now).unwrap(),
            Step::AlreadyDone(SignupStatus::PlanSelected)
        );
    }

    #[test]
    fn provision_needs_an_organization() {
        let now = Utc::now();
        let mut f = flow(SignupStatus::PlanSelected);
        assert!(matches!(decide(&f, Command::Provision, now), Err(AppError::Validation(_))));

        let org_id = Uuid::new_v4();
        f.org_id = Some(org_id);
        assert_eq!(decide(&f, Command::Provision, now).unwrap(), Step::Provision { org_id });

        f.status = SignupStatus::Provisioning.as_str().to_string();
        assert_eq!(decide(&f, Command::Provision, now).unwrap(), Step::Provision { org_id });

        f.status = SignupStatus::Completed.as_str().to_string();
        assert_eq!(
            decide(&f, Command::Provision, now).unwrap(),
            Step::AlreadyDone(SignupStatus::Completed)
        );
    }

    #[test]
    fn observe_expires_lazily() {
        let f = flow(SignupStatus::CodeSent);
        assert_eq!(
            decide(&f, Command::Observe, Utc::now()).unwrap(),
            Step::Report(SignupStatus::CodeSent)
        );
        let later = Utc::now() + Duration::minutes(11);
        assert_eq!(decide(&f, Command::Observe, later).unwrap(), Step::LazyExpire);
    }

    // Nenhum comando leva um fluxo a um status anterior no caminho feliz,
    // e nenhum comando tira um fluxo de `completed` ou de `expired` (exceto reenviar código).
    #[test]
    fn transitions_are_monotonic() {
        let now = Utc::now();
        let later = now + Duration::minutes(30);
        let commands = [
            Command::Verify { code_matches: true },
            Command::Verify { code_matches: false },
            Command::Resend,
            Command::ChoosePlan,
            Command::Provision,
            Command::Observe,
        ];

        for status in ALL {
            for base in [flow(status), invited(flow(status))] {
                let mut with_org = base.clone();
                with_org.org_id = with_org.org_id.or(Some(Uuid::new_v4()));
                for f in [base, with_org] {
                    for at in [now, later] {
                        for command in commands {
                            let Ok(step) = decide(&f, command, at) else { continue };
                            let Some(target) = target_status(step) else { continue };

                            if status == SignupStatus::Completed {
                                panic!("completed mudou para {target:?} via {command:?}");
                            }
                            if status == SignupStatus::Expired {
                                assert!(
                                    target == SignupStatus::Expired || command == Command::Resend,
                                    "expired mudou para {target:?} via {command:?}"
                                );
                                continue;
                            }
                            if let (Some(from), Some(to)) = (rank(status), rank(target)) {
                                assert!(to >= from, "{status:?} -> {target:?} via {command:?}");
                            }
                        }
                    }
                }
            }
        }
    }
}
