//! phi_audit_log
//!
//! Append-only, hash-chained audit log. One JSONL line per entry:
//!
//!   entry_hash = SHA-256(sequence | event_type | timestamp | data_json | prev_hash)
//!
//! pipe-delimited, matching the storage layer this crate was distilled from.
//! `session_hash` is stored alongside each entry but is deliberately excluded
//! from the hash input (as in the source), since it is itself a truncated,
//! non-reversible hash and carries no integrity obligation beyond storage.

use chrono::{DateTime, Utc};
use phi_audit_spec::AuditEvent;
use phi_common::{canonical_json_bytes, sha256_hex};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] phi_common::CanonError),
    #[error("hash mismatch at sequence {sequence}: expected {expected}, got {got}")]
    HashMismatch {
        sequence: u64,
        expected: String,
        got: String,
    },
    #[error("chain is already valid; fork_chain_after refuses to run on a healthy chain")]
    ChainAlreadyValid,
    #[error("sequence {0} not found in log")]
    SequenceNotFound(u64),
}

pub fn genesis_hash() -> String {
    format!("sha256:{}", "0".repeat(64))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub session_hash: String,
    pub data: AuditEvent,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Computes `entry_hash` per the formula above. `data_json` is the canonical
/// (sorted-key, no-whitespace) JSON rendering of `event`.
pub fn compute_entry_hash(
    sequence: u64,
    event_type: &str,
    timestamp: &DateTime<Utc>,
    event: &AuditEvent,
    prev_hash: &str,
) -> Result<String, AuditLogError> {
    let data_json = canonical_json_bytes(event)?;
    let data_json = String::from_utf8_lossy(&data_json);
    let payload = format!(
        "{}|{}|{}|{}|{}",
        sequence,
        event_type,
        timestamp.to_rfc3339(),
        data_json,
        prev_hash
    );
    Ok(format!("sha256:{}", sha256_hex(payload.as_bytes())))
}

pub struct AuditAppender {
    path: PathBuf,
    file: File,
    last_hash: String,
    next_sequence: u64,
    session_hash: String,
}

impl AuditAppender {
    /// Opens (creating if absent) the log at `path` for a given session.
    /// If the file already has entries, resumes from the last recorded hash
    /// and sequence rather than restarting at genesis.
    pub fn open(path: impl AsRef<Path>, session_hash: String) -> Result<Self, AuditLogError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            OpenOptions::new().create(true).write(true).open(&path)?;
        }
        let (last_hash, next_sequence) = match read_last_record(&path)? {
            Some(rec) => (rec.entry_hash, rec.sequence + 1),
            None => (genesis_hash(), 1),
        };
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            last_hash,
            next_sequence,
            session_hash,
        })
    }

    pub fn append(&mut self, event: AuditEvent) -> Result<AuditRecord, AuditLogError> {
        self.append_at(Utc::now(), event)
    }

    fn append_at(
        &mut self,
        timestamp: DateTime<Utc>,
        event: AuditEvent,
    ) -> Result<AuditRecord, AuditLogError> {
        let sequence = self.next_sequence;
        let event_type = event.event_type_name().to_string();
        let prev_hash = self.last_hash.clone();
        let entry_hash = compute_entry_hash(sequence, &event_type, &timestamp, &event, &prev_hash)?;

        let record = AuditRecord {
            sequence,
            event_type,
            timestamp,
            session_hash: self.session_hash.clone(),
            data: event,
            prev_hash,
            entry_hash: entry_hash.clone(),
        };

        let line = serde_json::to_string(&record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;

        self.last_hash = entry_hash;
        self.next_sequence += 1;
        Ok(record)
    }
}

fn read_all_records(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, AuditLogError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = File::open(path)?;
    let reader = BufReader::new(f);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str::<AuditRecord>(&line)?);
    }
    Ok(out)
}

fn read_last_record(path: impl AsRef<Path>) -> Result<Option<AuditRecord>, AuditLogError> {
    Ok(read_all_records(path)?.into_iter().last())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub valid_entries: usize,
    pub first_error_sequence: Option<u64>,
    pub last_valid_sequence: Option<u64>,
    pub last_valid_hash: Option<String>,
    pub errors: Vec<String>,
}

/// Walks the entire chain, continuing past the first broken link so that
/// every subsequent error is reported too, not just the first one.
pub fn verify_chain_detailed(path: impl AsRef<Path>) -> Result<ChainVerification, AuditLogError> {
    let records = read_all_records(path)?;
    let mut expected_prev = genesis_hash();
    let mut expected_sequence = 1u64;
    let mut valid_entries = 0usize;
    let mut first_error_sequence = None;
    let mut last_valid_sequence = None;
    let mut last_valid_hash = None;
    let mut errors = Vec::new();

    for rec in &records {
        let mut ok = true;
        if rec.sequence != expected_sequence {
            errors.push(format!(
                "sequence gap: expected {}, got {}",
                expected_sequence, rec.sequence
            ));
            ok = false;
        }
        if rec.prev_hash != expected_prev {
            errors.push(format!(
                "prev_hash mismatch at sequence {}: expected {}, got {}",
                rec.sequence, expected_prev, rec.prev_hash
            ));
            ok = false;
        }
        match compute_entry_hash(rec.sequence, &rec.event_type, &rec.timestamp, &rec.data, &rec.prev_hash) {
            Ok(computed) if computed == rec.entry_hash => {}
            _ => {
                errors.push(format!("entry_hash mismatch at sequence {}", rec.sequence));
                ok = false;
            }
        }

        if ok {
            valid_entries += 1;
            last_valid_sequence = Some(rec.sequence);
            last_valid_hash = Some(rec.entry_hash.clone());
            expected_prev = rec.entry_hash.clone();
        } else if first_error_sequence.is_none() {
            first_error_sequence = Some(rec.sequence);
            // Keep scanning with the stored (possibly-corrupt) hash as the
            // new expectation so later, unrelated breaks are still surfaced
            // rather than reported as one giant cascading failure.
            expected_prev = rec.entry_hash.clone();
        } else {
            expected_prev = rec.entry_hash.clone();
        }
        expected_sequence = rec.sequence + 1;
    }

    Ok(ChainVerification {
        valid: first_error_sequence.is_none(),
        total_entries: records.len(),
        valid_entries,
        first_error_sequence,
        last_valid_sequence,
        last_valid_hash,
        errors,
    })
}

pub fn verify_chain(path: impl AsRef<Path>) -> Result<bool, AuditLogError> {
    Ok(verify_chain_detailed(path)?.valid)
}

/// Recovery operation: truncates the log after `sequence` and appends a
/// CHAIN_FORK event rooted at the last known-valid hash. Refuses to run on
/// an already-valid chain. Destructive; callers at the façade boundary must
/// require explicit operator confirmation before invoking this.
pub fn fork_chain_after(
    path: impl AsRef<Path>,
    session_hash: String,
    sequence: u64,
) -> Result<AuditRecord, AuditLogError> {
    let path = path.as_ref();
    let verification = verify_chain_detailed(path)?;
    if verification.valid {
        return Err(AuditLogError::ChainAlreadyValid);
    }

    let records = read_all_records(path)?;
    let kept: Vec<AuditRecord> = records.into_iter().filter(|r| r.sequence <= sequence).collect();
    let fork_prev_hash = match kept.last() {
        Some(r) => r.entry_hash.clone(),
        None if sequence == 0 => genesis_hash(),
        None => return Err(AuditLogError::SequenceNotFound(sequence)),
    };

    {
        let f = OpenOptions::new().write(true).truncate(true).open(path)?;
        let mut f = f;
        for rec in &kept {
            let line = serde_json::to_string(rec)?;
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
        }
        f.flush()?;
    }

    let mut appender = AuditAppender {
        path: path.to_path_buf(),
        file: OpenOptions::new().append(true).open(path)?,
        last_hash: fork_prev_hash.clone(),
        next_sequence: sequence + 1,
        session_hash,
    };
    appender.append(AuditEvent::ChainForked(phi_audit_spec::ChainForked {
        session_hash: appender.session_hash.clone(),
        forked_after_sequence: sequence,
        fork_prev_hash,
    }))
}

pub fn get_entries(
    path: impl AsRef<Path>,
    limit: usize,
    offset: usize,
    event_type: Option<&str>,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<AuditRecord>, AuditLogError> {
    let records = read_all_records(path)?;
    let filtered = records.into_iter().filter(|r| {
        event_type.map(|t| r.event_type == t).unwrap_or(true)
            && since.map(|s| r.timestamp >= s).unwrap_or(true)
    });
    Ok(filtered.skip(offset).take(limit).collect())
}

pub fn count(path: impl AsRef<Path>) -> Result<usize, AuditLogError> {
    Ok(read_all_records(path)?.len())
}

pub fn size_bytes(path: impl AsRef<Path>) -> Result<u64, AuditLogError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(0);
    }
    Ok(std::fs::metadata(path)?.len())
}

pub fn get_oldest_timestamp(path: impl AsRef<Path>) -> Result<Option<DateTime<Utc>>, AuditLogError> {
    Ok(read_all_records(path)?.into_iter().next().map(|r| r.timestamp))
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionStatus {
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub retention_days: i64,
    pub is_compliant: bool,
    pub entries_past_retention: usize,
}

/// HIPAA's administrative safeguards floor is commonly implemented as a
/// six-year (2190-day) retention requirement; callers may pass a different
/// policy value.
pub fn get_retention_status(
    path: impl AsRef<Path>,
    retention_days: i64,
) -> Result<RetentionStatus, AuditLogError> {
    let records = read_all_records(path)?;
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let entries_past_retention = records.iter().filter(|r| r.timestamp < cutoff).count();
    Ok(RetentionStatus {
        oldest_timestamp: records.first().map(|r| r.timestamp),
        retention_days,
        is_compliant: entries_past_retention == 0,
        entries_past_retention,
    })
}

pub enum ExportFormat {
    Jsonl,
    Csv,
}

pub fn export_entries(
    path: impl AsRef<Path>,
    before: Option<DateTime<Utc>>,
    format: ExportFormat,
) -> Result<String, AuditLogError> {
    let records = read_all_records(path)?;
    let filtered: Vec<&AuditRecord> = records
        .iter()
        .filter(|r| before.map(|b| r.timestamp < b).unwrap_or(true))
        .collect();

    match format {
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for rec in filtered {
                out.push_str(&serde_json::to_string(rec)?);
                out.push('\n');
            }
            Ok(out)
        }
        ExportFormat::Csv => {
            let mut out = String::from("sequence,event_type,timestamp,session_hash,entry_hash\n");
            for rec in filtered {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    rec.sequence, rec.event_type, rec.timestamp.to_rfc3339(), rec.session_hash, rec.entry_hash
                ));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_audit_spec::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("phi_audit_log_test_{}_{}", std::process::id(), name))
    }

    #[test]
    fn hash_chain_verifies() {
        let path = temp_path("chain_verifies.jsonl");
        let _ = std::fs::remove_file(&path);

        let mut app = AuditAppender::open(&path, "sesshash".into()).unwrap();
        app.append(AuditEvent::VaultUnlocked(VaultUnlocked {
            session_hash: "sesshash".into(),
            scrypt_n: 16384,
        }))
        .unwrap();
        app.append(AuditEvent::VaultLocked(VaultLocked {
            session_hash: "sesshash".into(),
        }))
        .unwrap();

        let result = verify_chain_detailed(&path).unwrap();
        assert!(result.valid);
        assert_eq!(result.total_entries, 2);
        assert_eq!(result.valid_entries, 2);
    }

    #[test]
    fn tampering_is_detected_at_correct_sequence() {
        let path = temp_path("tamper.jsonl");
        let _ = std::fs::remove_file(&path);

        let mut app = AuditAppender::open(&path, "sesshash".into()).unwrap();
        app.append(AuditEvent::VaultUnlocked(VaultUnlocked {
            session_hash: "sesshash".into(),
            scrypt_n: 16384,
        }))
        .unwrap();
        app.append(AuditEvent::VaultLocked(VaultLocked {
            session_hash: "sesshash".into(),
        }))
        .unwrap();

        // Flip a byte in the data payload of the second line.
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
        lines[1] = lines[1].replace("VaultLocked", "VaultLockedX");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let result = verify_chain_detailed(&path).unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_error_sequence, Some(2));
        assert_eq!(result.last_valid_sequence, Some(1));
    }

    #[test]
    fn fork_chain_after_recovers_from_break() {
        let path = temp_path("fork.jsonl");
        let _ = std::fs::remove_file(&path);

        let mut app = AuditAppender::open(&path, "sesshash".into()).unwrap();
        app.append(AuditEvent::VaultUnlocked(VaultUnlocked {
            session_hash: "sesshash".into(),
            scrypt_n: 16384,
        }))
        .unwrap();
        app.append(AuditEvent::VaultLocked(VaultLocked {
            session_hash: "sesshash".into(),
        }))
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
        lines[1] = lines[1].replace("VaultLocked", "VaultLockedX");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        fork_chain_after(&path, "sesshash".into(), 1).unwrap();
        let result = verify_chain_detailed(&path).unwrap();
        assert!(result.valid);
        assert_eq!(result.total_entries, 2);
    }
}
