pub mod auth;
pub mod sequences;
pub mod signup;
pub mod tenancy;
