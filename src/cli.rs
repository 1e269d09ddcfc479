use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

/// auditor-access — scoped, time-limited access tokens for external auditors
#[derive(Parser)]
#[command(name = "auditor-access", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Manage auditor access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Deactivate expired tokens once and exit
    Sweep,

    /// Run the expiry sweep on an interval until interrupted
    Sweeper {
        /// Seconds between sweeps (overrides AUDITOR_ACCESS_SWEEP_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a new token. The secret is printed once and cannot be shown again.
    Issue {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        purpose: String,
        #[arg(long)]
        notes: Option<String>,
        /// full_read_only, specific_audit, specific_document, specific_ncr, specific_capa
        #[arg(long, default_value = "full_read_only")]
        scope: String,
        /// Entity id, required for specific_* scopes
        #[arg(long)]
        entity_id: Option<String>,
        /// Comma-separated resource types (e.g. document,ncr)
        #[arg(long, value_delimiter = ',')]
        allow: Option<Vec<String>>,
        #[arg(long, conflicts_with = "expires_at", required_unless_present = "expires_at")]
        expires_in_hours: Option<i64>,
        /// RFC 3339 timestamp
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
        #[arg(long)]
        max_uses: Option<u32>,
        /// Identity of the person issuing the token
        #[arg(long, env = "AUDITOR_ACCESS_ISSUER")]
        issued_by: String,
    },
    /// List tokens (previews only)
    List {
        #[arg(long)]
        include_inactive: bool,
    },
    /// Show one token
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// Revoke an active token
    Revoke {
        #[arg(long)]
        id: Uuid,
        #[arg(long, env = "AUDITOR_ACCESS_ISSUER")]
        by: String,
        #[arg(long)]
        reason: String,
    },
}

/// Resolve `--expires-in-hours` against `now`. Out-of-range values are an
/// error rather than a panic.
pub fn expiry_from_hours(now: DateTime<Utc>, hours: i64) -> anyhow::Result<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|d| now.checked_add_signed(d))
        .with_context(|| format!("--expires-in-hours {} is out of range", hours))
}
