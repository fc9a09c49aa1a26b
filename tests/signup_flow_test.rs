//! Cenários do fluxo de cadastro contra o banco real.

#[macro_use]
mod common;

use chrono::Utc;
use common::TestContext;
use onboarding_backend::{
    db::{tenant_schema, SignupRepository},
    models::{
        auth::{Role, User},
        signup::{ChoosePlanPayload, SignupStatus, VerifyCodePayload},
        tenancy::CreateInvitationPayload,
    },
    services::provisioning_service::schema_name_for,
};
use uuid::Uuid;

const IP: &str = "127.0.0.1";

#[tokio::test]
async fn happy_path_reaches_completed_with_isolated_schema() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let email = ctx.unique_email("happy");
    let (flow_id, org_id, schema) = ctx.complete_signup(&email).await;

    // Organização com o schema provisionado
    let org = ctx
        .state
        .organization_service
        .find_organization(org_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(org.db_schema.as_deref(), Some(schema.as_str()));
    assert!(schema.starts_with("org_"));

    let tables = tenant_schema::list_tables(&ctx.pool, &schema).await.unwrap();
    for table in tenant_schema::TENANT_TABLES {
        assert!(tables.iter().any(|t| t == table), "tabela ausente: {}", table);
    }

    // Dono virou admin e está verificado
    let user: (String, bool, Option<uuid::Uuid>) =
        sqlx::query_as("SELECT role, email_verified, org_id FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(user.0, Role::Admin.as_str());
    assert!(user.1);
    assert_eq!(user.2, Some(org_id));

    // Plano ativo e time padrão com o dono
    let tenant_repo = onboarding_backend::db::TenantRepository::new(ctx.pool.clone());
    let org_plans = tenant_repo.list_org_plans(org_id).await.unwrap();
    assert_eq!(org_plans.len(), 1);
    assert_eq!(org_plans[0].status, "active");
    let teams = tenant_repo.list_teams(org_id).await.unwrap();
    assert_eq!(teams.len(), 1);
    let members = tenant_repo.list_team_members(teams[0].id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, Role::Admin.as_str());

    // Status e repetição idempotente do provisionamento
    let status = ctx.state.signup_service.status(Some(flow_id), None).await.unwrap();
    assert_eq!(status.response.status, SignupStatus::Completed);
    assert!(status.clear_cookie);

    let again = ctx.state.signup_service.provision(flow_id, IP).await.unwrap();
    assert_eq!(again.status, SignupStatus::Completed);

    ctx.drop_schema(&schema).await;
}

#[tokio::test]
async fn choose_plan_is_idempotent() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("plan");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();
    let code = ctx.mailer.last_code_for(&email).unwrap();
    signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code }, IP)
        .await
        .unwrap();

    let payload = || ChoosePlanPayload {
        flow_id: started.flow_id,
        plan_code: "team".to_string(),
    };
    let first = signup.choose_plan(payload(), IP).await.unwrap();
    let second = signup.choose_plan(payload(), IP).await.unwrap();
    assert_eq!(first.org_id, second.org_id);
    assert_eq!(second.status, SignupStatus::PlanSelected);

    let orgs: i64 = sqlx::query_scalar("SELECT count(*) FROM organizations WHERE created_by_user_id = (SELECT id FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(orgs, 1);
}

#[tokio::test]
async fn unknown_plan_is_not_found() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("noplan");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();
    let code = ctx.mailer.last_code_for(&email).unwrap();
    signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code }, IP)
        .await
        .unwrap();

    let err = signup
        .choose_plan(
            ChoosePlanPayload { flow_id: started.flow_id, plan_code: "platinum".to_string() },
            IP,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let status = signup.status(Some(started.flow_id), None).await.unwrap();
    assert_eq!(status.response.status, SignupStatus::Verified);
}

#[tokio::test]
async fn exceeded_attempts_lock_the_code() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("attempts");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();
    let real_code = ctx.mailer.last_code_for(&email).unwrap();
    let wrong = if real_code == "000000" { "111111" } else { "000000" };

    for expected_remaining in (0..5).rev() {
        let err = signup
            .verify_code(
                VerifyCodePayload { flow_id: started.flow_id, code: wrong.to_string() },
                IP,
            )
            .await
            .unwrap_err();
        match err {
            onboarding_backend::common::error::AppError::InvalidCode { attempts_remaining } => {
                assert_eq!(attempts_remaining, expected_remaining)
            }
            other => panic!("esperava InvalidCode, veio {:?}", other),
        }
    }

    // Nem o código certo passa agora
    let err = signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code: real_code }, IP)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "too_many_attempts");

    let status = signup.status(Some(started.flow_id), None).await.unwrap();
    assert_eq!(status.response.status, SignupStatus::CodeSent);

    // Só um reenvio destrava: tentativas zeradas e código novo
    backdate_cooldown(&ctx, started.flow_id).await;
    signup.resend_code(started.flow_id, IP).await.unwrap();
    let fresh = ctx.mailer.last_code_for(&email).unwrap();
    let verified = signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code: fresh }, IP)
        .await
        .unwrap();
    assert_eq!(verified.status, SignupStatus::Verified);
}

async fn backdate_cooldown(ctx: &TestContext, flow_id: Uuid) {
    sqlx::query("UPDATE signup_flows SET resend_available_at = now() - interval '1 minute' WHERE id = $1")
        .bind(flow_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
}

async fn find_user(ctx: &TestContext, email: &str) -> User {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap()
}

async fn provisioning_row(ctx: &TestContext, flow_id: Uuid) -> (String, String, Option<String>) {
    sqlx::query_as("SELECT status, provisioning_status, last_error FROM signup_flows WHERE id = $1")
        .bind(flow_id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn expired_code_is_final_until_resend() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("expiry");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();
    let code = ctx.mailer.last_code_for(&email).unwrap();

    sqlx::query(
        "UPDATE signup_flows SET code_expires_at = now() - interval '1 minute', resend_available_at = now() - interval '1 minute' WHERE id = $1",
    )
    .bind(started.flow_id)
    .execute(&ctx.pool)
    .await
    .unwrap();

    for _ in 0..2 {
        let err = signup
            .verify_code(VerifyCodePayload { flow_id: started.flow_id, code: code.clone() }, IP)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "expired");
    }
    let status = signup.status(Some(started.flow_id), None).await.unwrap();
    assert_eq!(status.response.status, SignupStatus::Expired);

    // Reenvio reabre o fluxo com um código novo
    let resent = signup.resend_code(started.flow_id, IP).await.unwrap();
    assert_eq!(resent.status, SignupStatus::CodeSent);
    let fresh = ctx.mailer.last_code_for(&email).unwrap();
    let verified = signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code: fresh }, IP)
        .await
        .unwrap();
    assert_eq!(verified.status, SignupStatus::Verified);
}

#[tokio::test]
async fn resend_respects_cooldown() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("cooldown");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();

    let err = signup.resend_code(started.flow_id, IP).await.unwrap_err();
    assert_eq!(err.kind(), "cooldown_active");
    assert_eq!(ctx.mailer.sent_to(&email).len(), 1);
}

#[tokio::test]
async fn email_failure_rolls_back_user_and_flow() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let email = ctx.unique_email("rollback");
    ctx.mailer.set_failing(true);
    let err = ctx
        .state
        .signup_service
        .start(ctx.start_payload(&email), IP)
        .await
        .unwrap_err();
    ctx.mailer.set_failing(false);
    assert_eq!(err.kind(), "dependency");

    let users: i64 = sqlx::query_scalar("SELECT count(*) FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    let flows: i64 = sqlx::query_scalar("SELECT count(*) FROM signup_flows WHERE email = $1")
        .bind(&email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!((users, flows), (0, 0));

    // O e-mail continua livre para um novo cadastro
    ctx.state
        .signup_service
        .start(ctx.start_payload(&email), IP)
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let email = ctx.unique_email("dup");
    ctx.state.signup_service.start(ctx.start_payload(&email), IP).await.unwrap();
    let err = ctx
        .state
        .signup_service
        .start(ctx.start_payload(&email.to_uppercase()), IP)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn invited_signup_joins_the_organization() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    // Organização existente com um admin
    let admin_email = ctx.unique_email("admin");
    let (_, org_id, schema) = ctx.complete_signup(&admin_email).await;
    let admin = sqlx::query_as::<_, onboarding_backend::models::auth::User>("SELECT * FROM users WHERE email = $1")
        .bind(&admin_email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();

    // Convite
    let guest_email = ctx.unique_email("guest");
    let invite = ctx
        .state
        .invitation_service
        .create(
            &admin,
            org_id,
            &CreateInvitationPayload { email: guest_email.clone(), role: Some("manager".to_string()), team_id: None },
            IP,
        )
        .await
        .unwrap();
    let token = ctx.mailer.last_invite_token_for(&guest_email).unwrap();

    // Cadastro convidado: sem empresa, direto para `completed`
    let mut payload = ctx.start_payload(&guest_email);
    payload.company_name = None;
    payload.country = None;
    payload.invite_token = Some(token);
    let started = signup.start(payload, IP).await.unwrap();
    let code = ctx.mailer.last_code_for(&guest_email).unwrap();
    let verified = signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code }, IP)
        .await
        .unwrap();
    assert_eq!(verified.status, SignupStatus::Completed);
    assert_eq!(verified.org_id, Some(org_id));

    let guest: (String, Option<uuid::Uuid>, bool) =
        sqlx::query_as("SELECT role, org_id, email_verified FROM users WHERE email = $1")
            .bind(&guest_email)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(guest, (Role::Manager.as_str().to_string(), Some(org_id), true));

    let invite_status: String = sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1")
        .bind(invite.id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(invite_status, "accepted");

    let members: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM team_members tm JOIN users u ON u.id = tm.user_id WHERE u.email = $1",
    )
    .bind(&guest_email)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(members, 1);

    // Fluxo convidado não escolhe plano
    let err = signup
        .choose_plan(
            ChoosePlanPayload { flow_id: started.flow_id, plan_code: "starter".to_string() },
            IP,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    ctx.drop_schema(&schema).await;
}

#[tokio::test]
async fn expired_invitation_is_rejected_at_start() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let admin_email = ctx.unique_email("admin-exp");
    let (_, org_id, schema) = ctx.complete_signup(&admin_email).await;
    let admin = sqlx::query_as::<_, onboarding_backend::models::auth::User>("SELECT * FROM users WHERE email = $1")
        .bind(&admin_email)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();

    let guest_email = ctx.unique_email("late");
    let invite = ctx
        .state
        .invitation_service
        .create(
            &admin,
            org_id,
            &CreateInvitationPayload { email: guest_email.clone(), role: None, team_id: None },
            IP,
        )
        .await
        .unwrap();
    let token = ctx.mailer.last_invite_token_for(&guest_email).unwrap();
    sqlx::query("UPDATE invitations SET expires_at = now() - interval '1 day' WHERE id = $1")
        .bind(invite.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let mut payload = ctx.start_payload(&guest_email);
    payload.invite_token = Some(token);
    let err = ctx.state.signup_service.start(payload, IP).await.unwrap_err();
    assert_eq!(err.kind(), "expired");

    let invite_status: String = sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1")
        .bind(invite.id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(invite_status, "expired");

    ctx.drop_schema(&schema).await;
}

#[tokio::test]
async fn stale_lazy_expiry_does_not_expire_a_resent_code() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("stale");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();

    sqlx::query(
        "UPDATE signup_flows SET code_expires_at = now() - interval '1 minute', resend_available_at = now() - interval '1 minute' WHERE id = $1",
    )
    .bind(started.flow_id)
    .execute(&ctx.pool)
    .await
    .unwrap();

    // Reenvio chega antes da escrita de uma leitura antiga que decidiu expirar
    signup.resend_code(started.flow_id, IP).await.unwrap();
    let repo = SignupRepository::new(ctx.pool.clone());
    let applied = repo.mark_expired(&ctx.pool, started.flow_id, Utc::now()).await.unwrap();
    assert!(!applied);

    let status = signup.status(Some(started.flow_id), None).await.unwrap();
    assert_eq!(status.response.status, SignupStatus::CodeSent);

    let fresh = ctx.mailer.last_code_for(&email).unwrap();
    let verified = signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code: fresh }, IP)
        .await
        .unwrap();
    assert_eq!(verified.status, SignupStatus::Verified);
}

#[tokio::test]
async fn late_provisioning_failure_never_reopens_a_completed_flow() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let email = ctx.unique_email("late-fail");
    let (flow_id, _, schema) = ctx.complete_signup(&email).await;

    let repo = SignupRepository::new(ctx.pool.clone());
    let applied = repo.mark_provisioning_failed(flow_id, "timeout").await.unwrap();
    assert!(!applied);

    let (status, provisioning_status, last_error) = provisioning_row(&ctx, flow_id).await;
    assert_eq!(status, "completed");
    assert_eq!(provisioning_status, "success");
    assert_eq!(last_error, None);

    let reported = ctx.state.signup_service.status(Some(flow_id), None).await.unwrap();
    assert_eq!(reported.response.status, SignupStatus::Completed);

    ctx.drop_schema(&schema).await;
}

#[tokio::test]
async fn failed_provisioning_is_recorded_and_retry_completes() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let signup = &ctx.state.signup_service;

    let email = ctx.unique_email("ddl-fail");
    let started = signup.start(ctx.start_payload(&email), IP).await.unwrap();
    let code = ctx.mailer.last_code_for(&email).unwrap();
    signup
        .verify_code(VerifyCodePayload { flow_id: started.flow_id, code }, IP)
        .await
        .unwrap();
    let planned = signup
        .choose_plan(
            ChoosePlanPayload { flow_id: started.flow_id, plan_code: "starter".to_string() },
            IP,
        )
        .await
        .unwrap();
    let org_id = planned.org_id.unwrap();

    // Tabela incompatível já no schema derivado: a DDL do tenant falha
    let schema = schema_name_for(org_id);
    sqlx::raw_sql(&format!(
        r#"CREATE SCHEMA IF NOT EXISTS "{schema}"; CREATE TABLE "{schema}".clients (id INT PRIMARY KEY)"#
    ))
    .execute(&ctx.pool)
    .await
    .unwrap();

    let err = signup.provision(started.flow_id, IP).await.unwrap_err();
    assert_eq!(err.kind(), "dependency");

    let (status, provisioning_status, last_error) = provisioning_row(&ctx, started.flow_id).await;
    assert_eq!(status, "provisioning");
    assert_eq!(provisioning_status, "failed");
    assert!(last_error.is_some());

    let org = ctx
        .state
        .organization_service
        .find_organization(org_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(org.db_schema.as_deref(), Some(schema.as_str()));

    // Corrigida a causa, a nova tentativa conclui
    sqlx::raw_sql(&format!(r#"DROP TABLE "{schema}".clients"#))
        .execute(&ctx.pool)
        .await
        .unwrap();
    let retried = signup.provision(started.flow_id, IP).await.unwrap();
    assert_eq!(retried.status, SignupStatus::Completed);
    assert_eq!(retried.db_schema.as_deref(), Some(schema.as_str()));

    let (status, provisioning_status, last_error) = provisioning_row(&ctx, started.flow_id).await;
    assert_eq!((status.as_str(), provisioning_status.as_str(), last_error), ("completed", "success", None));

    ctx.drop_schema(&schema).await;
}

#[tokio::test]
async fn member_of_another_org_cannot_accept_an_invitation() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let admin_email = ctx.unique_email("owner-a");
    let (_, org_a, schema_a) = ctx.complete_signup(&admin_email).await;
    let other_email = ctx.unique_email("owner-b");
    let (_, org_b, schema_b) = ctx.complete_signup(&other_email).await;

    let admin = find_user(&ctx, &admin_email).await;
    let invite = ctx
        .state
        .invitation_service
        .create(
            &admin,
            org_a,
            &CreateInvitationPayload { email: other_email.clone(), role: None, team_id: None },
            IP,
        )
        .await
        .unwrap();
    let token = ctx.mailer.last_invite_token_for(&other_email).unwrap();

    let other = find_user(&ctx, &other_email).await;
    let err = ctx
        .state
        .invitation_service
        .accept(&other, &token, IP)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    // Nada mudou: usuário na organização original, convite pendente
    let other = find_user(&ctx, &other_email).await;
    assert_eq!(other.org_id, Some(org_b));
    let invite_status: String = sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1")
        .bind(invite.id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(invite_status, "pending");

    ctx.drop_schema(&schema_a).await;
    ctx.drop_schema(&schema_b).await;
}
