pub mod user_repo;
pub use user_repo::UserRepository;
pub mod tenancy_repo;
pub use tenancy_repo::TenantRepository;
pub mod invitation_repo;
pub use invitation_repo::InvitationRepository;
pub mod signup_repo;
pub use signup_repo::SignupRepository;
pub mod sequence_repo;
pub use sequence_repo::SequenceRepository;
pub mod rate_limit_repo;
pub use rate_limit_repo::RateLimitRepository;
pub mod audit_repo;
pub use audit_repo::AuditRepository;

pub mod tenant_schema;
