//! Session façade (spec.md §6): the single entry point the core is consumed
//! through. Owns every subsystem directly — no back-references between
//! them — per spec.md §9's arena model: the registry, token store, and
//! conversation context are reached only through the session, never
//! through each other.

use crate::error::SessionError;
use crate::review::ReviewItem;
use chrono::{DateTime, Utc};
use phi_audit_spec::{
    AuditEvent, PrivacyMode as AuditPrivacyMode, RedactionPerformed, RestorationPerformed, ReviewApproved,
    ReviewRejected, SpanSummary, TokenDeleted, VaultLocked, VaultUnlocked,
};
use phi_crypto::kdf::ScryptParams;
use phi_crypto::KeyManager;
use phi_detect::{Detector, Span};
use phi_entity::context::ConversationContext;
use phi_entity::registry::{EntityCandidate, EntityRegistry, RegisterContext};
use phi_orchestrator::{DetectorOrchestrator, KnownEntities};
use phi_storage::{Database, TokenStore};
use phi_tokenizer::RestoreMode;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const DEFAULT_MAX_TEXT_LEN: usize = 1_000_000;

pub struct RedactResult {
    pub redacted: String,
    pub spans: Vec<Span>,
    pub tokens_created: usize,
    pub needs_review: usize,
    pub processing_ms: u64,
    pub input_hash: String,
    pub normalized_input: String,
}

pub struct RestoreOutcome {
    pub restored: String,
    pub tokens_found: usize,
    pub tokens_unknown: usize,
}

/// Owns every subsystem for one vault. Locked at construction; `unlock`
/// derives the DEK before any PHI-handling operation is permitted.
pub struct Session {
    db: Arc<Database>,
    km: Mutex<Option<KeyManager>>,
    token_store: TokenStore,
    registry: EntityRegistry,
    context: Mutex<ConversationContext>,
    audit_path: std::path::PathBuf,
    audit: Mutex<Option<phi_audit_log::AuditAppender>>,
    session_hash: String,
    privacy_mode: Mutex<AuditPrivacyMode>,
    max_text_len: usize,
    orchestrator: DetectorOrchestrator,
    extra_allowlist: HashSet<String>,
    scrypt_params: ScryptParams,
}

impl Session {
    /// Opens (creating if absent) the vault database at `db_path`, with
    /// the audit log kept alongside it at `audit_path`. The session starts
    /// locked; callers must call `unlock` before `redact`/`restore`.
    pub fn open(db_path: impl AsRef<Path>, audit_path: impl AsRef<Path>) -> Result<Self, SessionError> {
        Self::open_with_options(db_path, audit_path, DEFAULT_MAX_TEXT_LEN, HashSet::new(), ScryptParams::default())
    }

    /// Same as `open`, with a deployment-supplied allowlist loaded by the
    /// caller (e.g. `phi_cli`'s `PhiConfig` reading the flat files it
    /// points at) merged into the built-in false-positive suppression, and
    /// a non-default scrypt cost parameter for first-time vault creation
    /// (ignored once the vault already has stored key material, since its
    /// `scrypt_log_n` travels with the stored blob).
    pub fn open_with_options(
        db_path: impl AsRef<Path>,
        audit_path: impl AsRef<Path>,
        max_text_len: usize,
        extra_allowlist: HashSet<String>,
        scrypt_params: ScryptParams,
    ) -> Result<Self, SessionError> {
        let db = Arc::new(Database::open(db_path)?);
        let token_store = TokenStore::new(Arc::clone(&db));
        let session_hash = phi_common::truncated_hash(&uuid::Uuid::new_v4().to_string(), 16);
        let detectors: Vec<Arc<dyn Detector>> = phi_detect::builtin_detectors().into_iter().map(Arc::from).collect();
        let orchestrator = DetectorOrchestrator::new(detectors);

        Ok(Self {
            db,
            km: Mutex::new(None),
            token_store,
            registry: EntityRegistry::new(),
            context: Mutex::new(ConversationContext::new(session_hash.clone(), "default")),
            audit_path: audit_path.as_ref().to_path_buf(),
            audit: Mutex::new(None),
            session_hash,
            privacy_mode: Mutex::new(AuditPrivacyMode::SafeHarbor),
            max_text_len,
            orchestrator,
            extra_allowlist,
            scrypt_params,
        })
    }

    fn with_audit<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut phi_audit_log::AuditAppender) -> Result<(), phi_audit_log::AuditLogError>,
    {
        let mut guard = self.audit.lock().unwrap();
        if let Some(appender) = guard.as_mut() {
            f(appender).map_err(SessionError::from)?;
        }
        Ok(())
    }

    /// Derives KEK, decrypts the stored DEK, and opens the audit log for
    /// this session. Fails with `InvalidKey` on MAC verification failure
    /// (`unlock` itself runs for a constant minimum duration).
    pub fn unlock(&self, passphrase: &[u8]) -> Result<(), SessionError> {
        let repo = phi_storage::VaultMetaRepo::new(&self.db);
        let mut km = match repo.load()? {
            Some(stored) => KeyManager::from_stored(stored),
            None => {
                let generated = KeyManager::generate(passphrase, self.scrypt_params)?;
                repo.initialize(generated.stored())?;
                generated
            }
        };
        if !km.is_unlocked() {
            km.unlock(passphrase)?;
        }

        let scrypt_n = km.stored().scrypt_log_n;
        let appender = phi_audit_log::AuditAppender::open(&self.audit_path, self.session_hash.clone())?;
        *self.audit.lock().unwrap() = Some(appender);
        *self.km.lock().unwrap() = Some(km);

        self.with_audit(|a| {
            a.append(AuditEvent::VaultUnlocked(VaultUnlocked {
                session_hash: self.session_hash.clone(),
                scrypt_n: 1u32 << scrypt_n,
            }))
            .map(|_| ())
        })
    }

    /// Wipes the live DEK and clears in-memory entity/context state
    /// (spec.md §6). Tokens already persisted remain in the encrypted
    /// store across this lock.
    pub fn lock(&self) -> Result<(), SessionError> {
        if let Some(km) = self.km.lock().unwrap().as_mut() {
            km.lock();
        }
        self.registry.clear();
        self.context.lock().unwrap().clear();
        self.with_audit(|a| {
            a.append(AuditEvent::VaultLocked(VaultLocked { session_hash: self.session_hash.clone() })).map(|_| ())
        })?;
        *self.audit.lock().unwrap() = None;
        Ok(())
    }

    fn require_unlocked(&self) -> Result<(), SessionError> {
        let guard = self.km.lock().unwrap();
        match guard.as_ref() {
            Some(km) if km.is_unlocked() => Ok(()),
            _ => Err(SessionError::SessionLocked),
        }
    }

    /// Builds the `entity_id -> (canonical_surface, entity_type)` map the
    /// known-entity pre-pass and resolver use to recognize returning
    /// entities across calls. Picks the longest recorded surface per
    /// entity as the canonical value.
    fn known_entities(&self) -> KnownEntities {
        let mut out: KnownEntities = HashMap::new();
        if let Ok(variants) = self.token_store.known_entities() {
            for (entity_id, surface, entity_type) in variants {
                out.entry(entity_id)
                    .and_modify(|(existing, _)| {
                        if surface.len() > existing.len() {
                            *existing = surface.clone();
                        }
                    })
                    .or_insert((surface, entity_type));
            }
        }
        out
    }

    /// Runs the full detect → tokenize pipeline over `text` (spec.md §2's
    /// data flow for a redact call).
    pub async fn redact(&self, text: &str) -> Result<RedactResult, SessionError> {
        self.require_unlocked()?;
        if text.chars().count() > self.max_text_len {
            return Err(SessionError::TextTooLarge { max: self.max_text_len, actual: text.chars().count() });
        }

        let started = Instant::now();
        let normalized = phi_normalizer::normalize(text);
        let known = self.known_entities();

        let raw_spans = self.orchestrator.detect(&normalized, &known).await?;
        let merged = phi_pipeline::merge_spans(&normalized, raw_spans, phi_pipeline::merger::DEFAULT_MIN_CONFIDENCE);
        let repeated = phi_pipeline::expand_repeated_values(
            &normalized,
            merged,
            phi_pipeline::repeats::DEFAULT_MIN_CONFIDENCE,
            phi_pipeline::repeats::DEFAULT_CONFIDENCE_DECAY,
            phi_pipeline::repeats::MAX_EXPANSIONS_PER_VALUE,
        );
        let corefed = phi_pipeline::resolve_coreferences(
            &normalized,
            repeated,
            phi_pipeline::coref::DEFAULT_SENTENCE_WINDOW,
            phi_pipeline::coref::DEFAULT_DECAY,
        );
        let safe_harbored = phi_pipeline::apply_safe_harbor(corefed);
        let allowed = phi_pipeline::apply_allowlist_with_extra(&normalized, safe_harbored, Some(&self.extra_allowlist));

        let per_call_entities = phi_entity::resolve_entities(allowed, &known);

        let km_guard = self.km.lock().unwrap();
        let km = km_guard.as_ref().expect("checked by require_unlocked");

        let mut registered_entities = Vec::with_capacity(per_call_entities.len());
        for entity in &per_call_entities {
            let representative = entity.mentions.first().expect("resolver never emits empty entities");
            let entity_id = self.registry.register(EntityCandidate::from_span(
                &representative.span,
                RegisterContext {
                    semantic_role: Some(match &representative.semantic_role {
                        phi_detect::SemanticRole::Patient => "patient".to_string(),
                        phi_detect::SemanticRole::Provider => "provider".to_string(),
                        phi_detect::SemanticRole::Relative => "relative".to_string(),
                        phi_detect::SemanticRole::Unknown => "unknown".to_string(),
                    }),
                    sentence_idx: None,
                    conversation_id: None,
                },
            ));
            registered_entities.push(phi_entity::Entity {
                id: entity_id,
                entity_type: entity.entity_type.clone(),
                canonical_value: entity.canonical_value.clone(),
                mentions: entity.mentions.clone(),
            });
        }

        let tokens_before = self.token_store.count().unwrap_or(0);
        let tokenized = phi_tokenizer::tokenize(&normalized, &registered_entities, km, &self.token_store)?;
        let tokens_after = self.token_store.count().unwrap_or(0);

        for entity in &registered_entities {
            let _ = self.token_store.record_variant(&entity.id, &entity.canonical_value, &entity.entity_type);
        }

        let mut context = self.context.lock().unwrap();
        for span in tokenized.spans.iter() {
            context.observe(&span.token, &span.entity_type, HashMap::new());
        }
        context.advance_turn();
        drop(context);

        let span_summaries: Vec<SpanSummary> = registered_entities
            .iter()
            .flat_map(|e| e.mentions.iter())
            .map(|m| SpanSummary {
                entity_type: m.span.entity_type.clone(),
                start: m.span.start,
                end: m.span.end,
                confidence: m.span.confidence,
                detector: m.span.detector.clone(),
            })
            .collect();

        let needs_review = self.registry.get_review_queue().len();
        let processing_ms = started.elapsed().as_millis() as u64;
        let input_hash = phi_common::sha256_bytes(text.as_bytes());

        self.with_audit(|a| {
            a.append(AuditEvent::RedactionPerformed(RedactionPerformed {
                session_hash: self.session_hash.clone(),
                input_hash: input_hash.clone(),
                span_count: span_summaries.len(),
                tokens_created: tokens_after.saturating_sub(tokens_before),
                needs_review,
                processing_ms,
                spans: span_summaries.clone(),
            }))
            .map(|_| ())
        })?;

        let all_spans: Vec<Span> = registered_entities.into_iter().flat_map(|e| e.mentions).map(|m| m.span).collect();

        Ok(RedactResult {
            redacted: tokenized.text,
            spans: all_spans,
            tokens_created: tokens_after.saturating_sub(tokens_before),
            needs_review,
            processing_ms,
            input_hash,
            normalized_input: normalized,
        })
    }

    /// Detection only, no tokenization — for downstream image/PDF
    /// redaction (spec.md §6 `detect_for_visual`).
    pub async fn detect_for_visual(&self, text: &str) -> Result<Vec<Span>, SessionError> {
        self.require_unlocked()?;
        let normalized = phi_normalizer::normalize(text);
        let known = self.known_entities();
        let spans = self.orchestrator.detect(&normalized, &known).await?;
        Ok(phi_pipeline::merge_spans(&normalized, spans, phi_pipeline::merger::DEFAULT_MIN_CONFIDENCE))
    }

    /// Resolves tokens in `text` under the session's configured privacy
    /// mode (spec.md §6 `restore`).
    pub fn restore(&self, text: &str) -> Result<RestoreOutcome, SessionError> {
        self.require_unlocked()?;
        let km_guard = self.km.lock().unwrap();
        let km = km_guard.as_ref().expect("checked by require_unlocked");
        let mode = match &*self.privacy_mode.lock().unwrap() {
            AuditPrivacyMode::Redacted => RestoreMode::Redacted,
            AuditPrivacyMode::SafeHarbor => RestoreMode::SafeHarbor,
            AuditPrivacyMode::Research => RestoreMode::Research,
        };
        let result = phi_tokenizer::restore(text, &self.token_store, km, mode)?;

        self.with_audit(|a| {
            a.append(AuditEvent::RestorationPerformed(RestorationPerformed {
                session_hash: self.session_hash.clone(),
                mode: self.privacy_mode.lock().unwrap().clone(),
                tokens_found: result.tokens_found.len(),
                tokens_unknown: result.tokens_unknown.len(),
            }))
            .map(|_| ())
        })?;

        Ok(RestoreOutcome {
            restored: result.restored,
            tokens_found: result.tokens_found.len(),
            tokens_unknown: result.tokens_unknown.len(),
        })
    }

    pub fn set_privacy_mode(&self, mode: AuditPrivacyMode) -> Result<(), SessionError> {
        *self.privacy_mode.lock().unwrap() = mode.clone();
        self.with_audit(|a| {
            a.append(AuditEvent::PrivacyModeChanged(phi_audit_spec::PrivacyModeChanged {
                session_hash: self.session_hash.clone(),
                mode,
            }))
            .map(|_| ())
        })
    }

    pub fn get_tokens(&self) -> Result<Vec<phi_storage::TokenEntry>, SessionError> {
        Ok(self.token_store.list_tokens()?)
    }

    pub fn delete_token(&self, token: &str) -> Result<(), SessionError> {
        if !self.token_store.delete(token)? {
            return Err(SessionError::TokenNotFound(token.to_string()));
        }
        self.with_audit(|a| {
            a.append(AuditEvent::TokenDeleted(TokenDeleted { session_hash: self.session_hash.clone(), token: token.to_string() }))
                .map(|_| ())
        })
    }

    pub fn get_pending_reviews(&self) -> Vec<ReviewItem> {
        self.registry
            .get_review_queue()
            .iter()
            .map(|c| {
                let entity_type = self.registry.get_entity(&c.target_entity_id).map(|e| e.entity_type).unwrap_or_default();
                ReviewItem::from_candidate(c, entity_type, String::new())
            })
            .collect()
    }

    pub fn approve_review(&self, review_id: &str) -> Result<(), SessionError> {
        let (candidate_id, target_id) =
            review_id.split_once("->").ok_or_else(|| SessionError::ReviewNotFound(review_id.to_string()))?;
        if !self.registry.approve_merge(candidate_id, target_id) {
            return Err(SessionError::ReviewNotFound(review_id.to_string()));
        }
        self.with_audit(|a| {
            a.append(AuditEvent::ReviewApproved(ReviewApproved { session_hash: self.session_hash.clone(), review_id: review_id.to_string() }))
                .map(|_| ())
        })
    }

    pub fn reject_review(&self, review_id: &str) -> Result<(), SessionError> {
        let (candidate_id, target_id) =
            review_id.split_once("->").ok_or_else(|| SessionError::ReviewNotFound(review_id.to_string()))?;
        if !self.registry.reject_merge(candidate_id, target_id) {
            return Err(SessionError::ReviewNotFound(review_id.to_string()));
        }
        self.with_audit(|a| {
            a.append(AuditEvent::ReviewRejected(ReviewRejected { session_hash: self.session_hash.clone(), review_id: review_id.to_string() }))
                .map(|_| ())
        })
    }

    pub fn verify_audit_chain(&self) -> Result<phi_audit_log::ChainVerification, SessionError> {
        Ok(phi_audit_log::verify_chain_detailed(&self.audit_path)?)
    }

    pub fn get_audit_entries(&self, limit: usize) -> Result<Vec<phi_audit_log::AuditRecord>, SessionError> {
        Ok(phi_audit_log::get_entries(&self.audit_path, limit, 0, None, None::<DateTime<Utc>>)?)
    }

    /// Locks the vault and drops the session's resources.
    pub fn close(self) -> Result<(), SessionError> {
        self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        let pid = std::process::id();
        let counter = std::sync::atomic::AtomicU64::new(0);
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let dir = std::env::temp_dir();
        let db_path = dir.join(format!("phi_session_test_{pid}_{n}.sqlite3"));
        let audit_path = dir.join(format!("phi_session_test_{pid}_{n}.audit.jsonl"));
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(&audit_path);
        Session::open(db_path, audit_path).unwrap()
    }

    #[test]
    fn operations_fail_closed_while_locked() {
        let session = test_session();
        let err = session.restore("[NAME_1] called").unwrap_err();
        assert!(matches!(err, SessionError::SessionLocked));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn redact_then_restore_research_round_trips_value() {
        let session = test_session();
        session.unlock(b"correct horse battery staple").unwrap();

        let result = session.redact("John Smith's SSN is 123-45-6789.").await.unwrap();
        assert!(!result.redacted.contains("John Smith"));
        assert!(!result.redacted.contains("123-45-6789"));
        assert!(result.tokens_created >= 1);

        session.set_privacy_mode(AuditPrivacyMode::Research).unwrap();
        let restored = session.restore(&result.redacted).unwrap();
        assert_eq!(restored.tokens_unknown, 0);
    }

    #[tokio::test]
    async fn redact_rejects_oversized_input() {
        let session = test_session();
        session.unlock(b"pw").unwrap();
        let huge = "a".repeat(DEFAULT_MAX_TEXT_LEN + 1);
        let err = session.redact(&huge).await.unwrap_err();
        assert!(matches!(err, SessionError::TextTooLarge { .. }));
    }

    #[tokio::test]
    async fn lock_then_redact_requires_unlock_again() {
        let session = test_session();
        session.unlock(b"pw").unwrap();
        session.redact("hello").await.unwrap();
        session.lock().unwrap();
        let err = session.redact("hello").await.unwrap_err();
        assert!(matches!(err, SessionError::SessionLocked));
    }

    #[test]
    fn verify_audit_chain_is_intact_after_unlock_and_lock() {
        let session = test_session();
        session.unlock(b"pw").unwrap();
        session.lock().unwrap();
        let verification = session.verify_audit_chain().unwrap();
        assert!(verification.valid);
    }
}
