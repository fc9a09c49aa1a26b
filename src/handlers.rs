pub mod auth;
pub mod invitations;
pub mod sequences;
pub mod signup;
