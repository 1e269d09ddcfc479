//! Auditor access tokens: scoped, time-limited bearer credentials for
//! external auditors.
//!
//! Issuance, validation under usage limits, scope checks, revocation and
//! expiry sweeps over a pluggable [`store::TokenStore`].

pub mod audit;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod store;
pub mod tokens;
