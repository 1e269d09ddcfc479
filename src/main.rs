use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auditor_access::audit::PgAuditSink;
use auditor_access::cli::{self, Commands, TokenCommands};
use auditor_access::config::{self, Config};
use auditor_access::jobs;
use auditor_access::models::token::ScopeType;
use auditor_access::store::postgres::PgStore;
use auditor_access::tokens::{AccessTokens, IssueRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg);

    let args = cli::Cli::parse();

    let result = match args.command {
        Commands::Migrate => {
            let db = PgStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await
        }
        Commands::Token { command } => {
            let (tokens, audit) = connect(&cfg).await?;
            let result = handle_token_command(command, &tokens).await;
            // The runtime drops with main; wait for audit inserts first.
            audit.flush().await;
            result
        }
        Commands::Sweep => {
            let (tokens, _) = connect(&cfg).await?;
            let updated = tokens.sweep_expired().await?;
            println!("Deactivated {} expired token(s).", updated);
            Ok(())
        }
        Commands::Sweeper { interval_secs } => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            let (tokens, _) = build(db, &cfg);
            let every = interval_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or(cfg.sweep_interval);

            tracing::info!(interval_secs = every.as_secs(), "expiry sweeper started");
            let handle = jobs::expiry::spawn(tokens.sweeper(), every);
            tokio::signal::ctrl_c().await?;
            handle.abort();
            tracing::info!("expiry sweeper stopped");
            Ok(())
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "auditor_access=debug,audit=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect(cfg: &Config) -> anyhow::Result<(AccessTokens, Arc<PgAuditSink>)> {
    let db = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to the token store")?;
    Ok(build(db, cfg))
}

fn build(db: PgStore, cfg: &Config) -> (AccessTokens, Arc<PgAuditSink>) {
    let audit = Arc::new(PgAuditSink::new(db.pool().clone()));
    let tokens = AccessTokens::with_max_lifetime(Arc::new(db), audit.clone(), cfg.max_lifetime());
    (tokens, audit)
}

async fn handle_token_command(cmd: TokenCommands, tokens: &AccessTokens) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue {
            name,
            email,
            organization,
            purpose,
            notes,
            scope,
            entity_id,
            allow,
            expires_in_hours,
            expires_at,
            max_uses,
            issued_by,
        } => {
            let scope_type: ScopeType = scope.parse()?;
            let expires_at = match (expires_at, expires_in_hours) {
                (Some(at), _) => at,
                (None, Some(hours)) => cli::expiry_from_hours(Utc::now(), hours)?,
                (None, None) => anyhow::bail!("one of --expires-at or --expires-in-hours is required"),
            };

            let issued = tokens
                .issue(IssueRequest {
                    auditor_name: name,
                    auditor_email: email,
                    auditor_organization: organization,
                    purpose,
                    notes,
                    scope_type,
                    scope_entity_id: entity_id,
                    allowed_resources: allow,
                    expires_at,
                    max_uses,
                    created_by: issued_by,
                })
                .await?;

            println!(
                "Token issued:\n  ID:      {}\n  Expires: {}\n  Secret:  {}\n\nStore the secret now; it will not be shown again.",
                issued.token_id,
                issued.expires_at.to_rfc3339(),
                issued.raw_secret.as_str()
            );
        }
        TokenCommands::List { include_inactive } => {
            let summaries = tokens.list(include_inactive).await?;
            if summaries.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<38} {:<16} {:<28} {:<18} {:<10} {:<8}",
                    "ID", "PREVIEW", "AUDITOR", "SCOPE", "STATUS", "USES"
                );
                for t in summaries {
                    let uses = match t.max_uses {
                        Some(max) => format!("{}/{}", t.current_uses, max),
                        None => t.current_uses.to_string(),
                    };
                    println!(
                        "{:<38} {:<16} {:<28} {:<18} {:<10} {:<8}",
                        t.id, t.secret_preview, t.auditor_email, t.scope_type, t.status, uses
                    );
                }
            }
        }
        TokenCommands::Show { id } => {
            let token = tokens.find(id).await?;
            let summary = token.summary_at(Utc::now());
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        TokenCommands::Revoke { id, by, reason } => {
            let revoked = tokens.revoke(id, &by, &reason).await?;
            println!(
                "Token {} revoked at {}.",
                revoked.id,
                revoked
                    .revoked_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
