mod config;

use clap::{Parser, Subcommand};
use config::PhiConfig;
use dotenvy::from_path as dotenv_from_path;
use phi_audit_spec::PrivacyMode;
use phi_session::Session;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    Session(#[from] phi_session::SessionError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Broad category, per spec.md §7's error taxonomy.
    fn kind(&self) -> &'static str {
        match self {
            CliError::Usage(_) => "input",
            CliError::Config(_) => "input",
            CliError::Session(phi_session::SessionError::SessionLocked) => "session",
            CliError::Session(phi_session::SessionError::Orchestrator(
                phi_orchestrator::OrchestratorError::QueueFull { .. },
            )) => "backpressure",
            CliError::Session(phi_session::SessionError::Audit(_)) => "integrity",
            CliError::Session(phi_session::SessionError::Storage(_)) => "persistence",
            CliError::Session(_) => "input",
            CliError::Json(_) => "internal",
        }
    }

    fn code(&self) -> String {
        match self {
            CliError::Usage(_) => "USAGE_ERROR".to_string(),
            CliError::Config(_) => "CONFIG_ERROR".to_string(),
            CliError::Session(e) => e.code().to_string(),
            CliError::Json(_) => "SERIALIZATION_ERROR".to_string(),
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) | CliError::Config(_) => 2,
            CliError::Json(_) => 1,
            CliError::Session(e) => e.exit_code(),
        }
    }
}

#[derive(Parser)]
#[command(name = "phi-control", version, about = "PHI/PII detection, redaction and restoration control plane")]
struct Args {
    /// Path to the vault's SQLite database file.
    #[arg(long, global = true, default_value = "phi_vault.sqlite3")]
    vault: PathBuf,

    /// Path to the hash-chained audit log (JSONL), kept alongside the vault.
    #[arg(long, global = true, default_value = "phi_vault.audit.jsonl")]
    audit_log: PathBuf,

    /// Path to a TOML config file (missing file falls back to defaults).
    #[arg(long, global = true, default_value = "phi-control.toml")]
    config: PathBuf,

    /// Repo/working root to look for a `.env` in, before falling back to CWD.
    #[arg(long, global = true, default_value = ".")]
    repo_root: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Unlock the vault, deriving the data-encryption key from a passphrase.
    Unlock {
        /// Vault passphrase. Prefer PHI_PASSPHRASE env var over this flag.
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Detect and tokenize PHI/PII in `text`, persisting the resulting tokens.
    Redact {
        #[arg(long)]
        text: String,
    },

    /// Detect PHI/PII spans without tokenizing, for downstream image/PDF redaction.
    DetectVisual {
        #[arg(long)]
        text: String,
    },

    /// Restore a previously redacted text under the vault's current privacy mode.
    Restore {
        #[arg(long)]
        text: String,
    },

    /// Change the privacy mode governing future `restore` calls.
    SetPrivacyMode {
        /// One of: redacted, safe-harbor, research.
        #[arg(long)]
        mode: String,
    },

    /// List every token currently stored in the vault.
    ListTokens,

    /// Permanently delete a single token's stored mapping.
    DeleteToken {
        #[arg(long)]
        token: String,
    },

    /// List entity merges awaiting human review.
    PendingReviews,

    /// Approve a pending entity merge.
    ApproveReview {
        #[arg(long)]
        review_id: String,
    },

    /// Reject a pending entity merge.
    RejectReview {
        #[arg(long)]
        review_id: String,
    },

    /// Verify the audit log's hash chain end-to-end.
    VerifyAudit,

    /// Print recent audit log entries.
    AuditEntries {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Lock the vault and exit cleanly.
    Close,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let body = json!({ "kind": e.kind(), "code": e.code(), "message": e.to_string() });
        eprintln!("{body}");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let args = Args::parse();
    load_dotenv(&args.repo_root);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cfg = PhiConfig::load(&args.config)?;
    let extra_allowlist = cfg.load_extra_allowlist()?;
    let scrypt_params =
        phi_crypto::kdf::ScryptParams { log_n: cfg.scrypt_log_n, ..phi_crypto::kdf::ScryptParams::default() };

    tracing::info!(vault = %args.vault.display(), "opening vault");
    let session =
        Session::open_with_options(&args.vault, &args.audit_log, cfg.max_text_len, extra_allowlist, scrypt_params)?;

    match args.cmd {
        Command::Unlock { passphrase } => {
            let passphrase = resolve_passphrase(passphrase)?;
            session.unlock(passphrase.as_bytes())?;
            println!("{}", json!({ "status": "unlocked" }));
            Ok(())
        }

        Command::Redact { text } => {
            unlock_from_env(&session)?;
            let result = session.redact(&text).await?;
            let spans: Vec<_> = result
                .spans
                .iter()
                .map(|s| {
                    json!({
                        "start": s.start,
                        "end": s.end,
                        "entity_type": s.entity_type,
                        "confidence": s.confidence,
                        "detector": s.detector,
                        "needs_review": s.needs_review,
                    })
                })
                .collect();
            println!(
                "{}",
                json!({
                    "redacted": result.redacted,
                    "spans": spans,
                    "tokens_created": result.tokens_created,
                    "needs_review": result.needs_review,
                    "processing_ms": result.processing_ms,
                    "input_hash": result.input_hash,
                })
            );
            Ok(())
        }

        Command::DetectVisual { text } => {
            unlock_from_env(&session)?;
            let spans = session.detect_for_visual(&text).await?;
            let out: Vec<_> = spans
                .iter()
                .map(|s| {
                    json!({
                        "start": s.start,
                        "end": s.end,
                        "entity_type": s.entity_type,
                        "confidence": s.confidence,
                        "detector": s.detector,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string(&out)?);
            Ok(())
        }

        Command::Restore { text } => {
            unlock_from_env(&session)?;
            let outcome = session.restore(&text)?;
            println!(
                "{}",
                json!({
                    "restored": outcome.restored,
                    "tokens_found": outcome.tokens_found,
                    "tokens_unknown": outcome.tokens_unknown,
                })
            );
            Ok(())
        }

        Command::SetPrivacyMode { mode } => {
            unlock_from_env(&session)?;
            let mode = parse_privacy_mode(&mode)?;
            session.set_privacy_mode(mode)?;
            println!("{}", json!({ "status": "ok" }));
            Ok(())
        }

        Command::ListTokens => {
            unlock_from_env(&session)?;
            let tokens = session.get_tokens()?;
            let out: Vec<_> = tokens
                .iter()
                .map(|t| {
                    json!({
                        "token": t.token,
                        "entity_type": t.entity_type,
                        "safe_harbor": t.safe_harbor,
                        "created_at": t.created_at,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string(&out)?);
            Ok(())
        }

        Command::DeleteToken { token } => {
            unlock_from_env(&session)?;
            session.delete_token(&token)?;
            println!("{}", json!({ "status": "deleted", "token": token }));
            Ok(())
        }

        Command::PendingReviews => {
            unlock_from_env(&session)?;
            let reviews = session.get_pending_reviews();
            println!("{}", serde_json::to_string(&reviews)?);
            Ok(())
        }

        Command::ApproveReview { review_id } => {
            unlock_from_env(&session)?;
            session.approve_review(&review_id)?;
            println!("{}", json!({ "status": "approved", "review_id": review_id }));
            Ok(())
        }

        Command::RejectReview { review_id } => {
            unlock_from_env(&session)?;
            session.reject_review(&review_id)?;
            println!("{}", json!({ "status": "rejected", "review_id": review_id }));
            Ok(())
        }

        Command::VerifyAudit => {
            let verification = session.verify_audit_chain()?;
            println!("{}", serde_json::to_string(&verification)?);
            Ok(())
        }

        Command::AuditEntries { limit } => {
            let entries = session.get_audit_entries(limit)?;
            println!("{}", serde_json::to_string(&entries)?);
            Ok(())
        }

        Command::Close => {
            unlock_from_env(&session)?;
            session.close()?;
            println!("{}", json!({ "status": "closed" }));
            Ok(())
        }
    }
}

/// Best-effort `.env` load from the repo root, falling back to CWD, then
/// silently proceeding — the teacher's exact pattern in `control_cli::main`.
fn load_dotenv(repo_root: &Path) {
    let repo_env = repo_root.join(".env");
    if repo_env.exists() {
        let _ = dotenv_from_path(&repo_env);
        eprintln!("loaded env from {}", repo_env.display());
    } else if Path::new(".env").exists() {
        let _ = dotenv_from_path(".env");
        eprintln!("loaded env from ./.env");
    }
}

fn resolve_passphrase(flag: Option<String>) -> Result<String, CliError> {
    flag.or_else(|| std::env::var("PHI_PASSPHRASE").ok())
        .ok_or_else(|| CliError::Usage("no passphrase given (pass --passphrase or set PHI_PASSPHRASE)".to_string()))
}

/// Every subcommand other than `unlock` needs the vault open first; since
/// each CLI invocation is a single process, `unlock` happens transparently
/// ahead of the requested operation rather than requiring a separate call.
fn unlock_from_env(session: &Session) -> Result<(), CliError> {
    let passphrase = resolve_passphrase(None)?;
    session.unlock(passphrase.as_bytes()).map_err(CliError::from)
}

fn parse_privacy_mode(s: &str) -> Result<PrivacyMode, CliError> {
    match s {
        "redacted" => Ok(PrivacyMode::Redacted),
        "safe-harbor" | "safe_harbor" => Ok(PrivacyMode::SafeHarbor),
        "research" => Ok(PrivacyMode::Research),
        other => Err(CliError::Usage(format!("unknown privacy mode '{other}' (expected redacted, safe-harbor, research)"))),
    }
}
