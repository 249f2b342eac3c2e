use thiserror::Error;

/// Façade-level error taxonomy (spec.md §7). Downstream crate errors fold in
/// via `#[from]`, the teacher's aggregation pattern in `control_cli::CliError`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("input exceeds the maximum of {max} characters (got {actual})")]
    TextTooLarge { max: usize, actual: usize },
    #[error("session is locked; call unlock() first")]
    SessionLocked,
    #[error("review item '{0}' not found")]
    ReviewNotFound(String),
    #[error("token '{0}' not found")]
    TokenNotFound(String),
    #[error("normalization error: {0}")]
    Normalize(#[from] phi_normalizer::NormalizeError),
    #[error("detection error: {0}")]
    Orchestrator(#[from] phi_orchestrator::OrchestratorError),
    #[error("tokenization error: {0}")]
    Tokenize(#[from] phi_tokenizer::TokenizeError),
    #[error("restoration error: {0}")]
    Restore(#[from] phi_tokenizer::RestoreError),
    #[error("storage error: {0}")]
    Storage(#[from] phi_storage::StorageError),
    #[error("key manager error: {0}")]
    KeyManager(#[from] phi_crypto::KeyManagerError),
    #[error("audit log error: {0}")]
    Audit(#[from] phi_audit_log::AuditLogError),
}

impl SessionError {
    /// Stable machine code exposed at the façade boundary (spec.md §6/§7).
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::TextTooLarge { .. } => "TEXT_TOO_LARGE",
            SessionError::SessionLocked => "SESSION_LOCKED",
            SessionError::ReviewNotFound(_) => "REVIEW_NOT_FOUND",
            SessionError::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            SessionError::Normalize(_) => "INVALID_INPUT",
            SessionError::Orchestrator(phi_orchestrator::OrchestratorError::QueueFull { .. }) => "QUEUE_FULL",
            SessionError::Tokenize(_) => "TOKENIZE_FAILED",
            SessionError::Restore(_) => "RESTORE_FAILED",
            SessionError::Storage(_) => "PERSISTENCE_ERROR",
            SessionError::KeyManager(phi_crypto::KeyManagerError::InvalidKey) => "INVALID_KEY",
            SessionError::KeyManager(phi_crypto::KeyManagerError::Locked) => "SESSION_LOCKED",
            SessionError::KeyManager(_) => "KEY_ERROR",
            SessionError::Audit(_) => "AUDIT_ERROR",
        }
    }

    /// Exit code mapping for a CLI front-end, per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::SessionLocked => 3,
            SessionError::Orchestrator(phi_orchestrator::OrchestratorError::QueueFull { .. }) => 4,
            _ => 1,
        }
    }
}
