pub mod audit;
pub mod auth;
pub mod email;
pub mod invitation_service;
pub mod organization_service;
pub mod provisioning_service;
pub mod rate_limit;
pub mod sequence_service;
pub mod signup_flow;
pub mod signup_service;
pub mod tenant_router;
pub mod verification;
