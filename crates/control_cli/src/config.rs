//! `PhiConfig`: TOML-file configuration for `phi-control`, with environment
//! overrides layered on top via the teacher's `dotenvy` idiom (best-effort
//! `.env` load, visible but never fatal). Covers the concerns spec.md §1
//! scopes out of the core crates ("CLI, configuration loading, packaging")
//! so they live here instead.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("reading allowlist file {path}: {source}")]
    Allowlist { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhiConfig {
    pub max_text_len: usize,
    pub detector_timeout_ms: u64,
    pub max_concurrent_detections: usize,
    pub max_queue_depth: usize,
    pub scrypt_log_n: u8,
    pub session_idle_timeout_secs: u64,
    pub audit_retention_days: u32,
    pub allowlist_files: Vec<PathBuf>,
}

impl Default for PhiConfig {
    fn default() -> Self {
        Self {
            max_text_len: phi_session::DEFAULT_MAX_TEXT_LEN,
            detector_timeout_ms: 5_000,
            max_concurrent_detections: 10,
            max_queue_depth: 50,
            scrypt_log_n: 15,
            session_idle_timeout_secs: 900,
            audit_retention_days: 2555, // ~7 years, a common Safe Harbor retention floor
            allowlist_files: Vec::new(),
        }
    }
}

impl PhiConfig {
    /// Loads `path` if present, falling back to defaults entirely when it
    /// is absent (mirrors the teacher's best-effort `.env` loading: missing
    /// config is visible, never fatal).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            eprintln!("no config file found at {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Reads every path in `allowlist_files`, one entry per line, merged
    /// into a single normalized (lowercased, whitespace-collapsed) set fed
    /// to `phi_pipeline::apply_allowlist_with_extra` via `Session::open_with_options`.
    pub fn load_extra_allowlist(&self) -> Result<HashSet<String>, ConfigError> {
        let mut out = HashSet::new();
        for path in &self.allowlist_files {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Allowlist { path: path.clone(), source })?;
            for line in raw.lines() {
                let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
                if !normalized.is_empty() {
                    out.insert(normalized);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cfg = PhiConfig::load("/nonexistent/phi-control.toml").unwrap();
        assert_eq!(cfg.max_text_len, phi_session::DEFAULT_MAX_TEXT_LEN);
    }

    #[test]
    fn parses_toml_overrides() {
        let dir = std::env::temp_dir().join(format!("phi_cli_config_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("phi-control.toml");
        std::fs::write(&path, "max_text_len = 500\nscrypt_log_n = 12\n").unwrap();
        let cfg = PhiConfig::load(&path).unwrap();
        assert_eq!(cfg.max_text_len, 500);
        assert_eq!(cfg.scrypt_log_n, 12);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
