//! File-backed `PolicyLog` with crash-safe, truncate-at-first-corruption
//! reload.
//!
//! JSONL read/reload is grounded on
//! `other_examples/c9078ead_..._audit_log.rs`'s `AuditLog::load_from_file`,
//! generalized to this core's line-oriented append-only external format;
//! the temp-file test idiom is grounded on this crate's allowlist tests
//! (`std::env::temp_dir()` plus a nanosecond-timestamped filename, no
//! `tempfile` dependency).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{policy_at, verify_seals, ChainValidationResult, PolicyLog};
use crate::engine::rules::PolicyRecord;
use crate::error::{GovernanceError, Result};
use crate::observe::{GovernanceEvent, LogMetrics, NullObserver, Observer};
use crate::seal::{format_effective_at, link_hash, PolicySeal};
use crate::signer::Signer;

/// Construction-time options for [`FilePolicyLog`].
#[derive(Debug, Clone)]
pub struct FilePolicyLogOptions {
    /// Externally supplied storage-pipeline fingerprint, stamped into
    /// every seal this log creates. The persisted JSONL format has no
    /// field for it, so it is reconstructed from this configured value on
    /// reload rather than read back from disk.
    pub root_chain_hash: [u8; 32],
}

impl Default for FilePolicyLogOptions {
    fn default() -> Self {
        Self {
            root_chain_hash: [0u8; 32],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    #[serde(rename = "Signature")]
    signature: String,
    #[serde(rename = "EffectiveAt")]
    effective_at: String,
    #[serde(rename = "PreviousHash")]
    previous_hash: String,
    #[serde(rename = "Index")]
    index: u32,
    #[serde(rename = "Policy")]
    policy: PolicyRecord,
}

struct State {
    seals: Vec<PolicySeal>,
    cached_valid: bool,
    file: Option<File>,
}

/// A `PolicyLog` persisted as newline-delimited JSON records.
pub struct FilePolicyLog {
    path: PathBuf,
    signer: Box<dyn Signer>,
    options: FilePolicyLogOptions,
    state: RwLock<State>,
    metrics: LogMetrics,
    observer: Box<dyn Observer>,
}

impl FilePolicyLog {
    /// Opens (creating if absent) the ledger at `path`.
    ///
    /// Reload trusts signatures at load time and does not re-verify them;
    /// the cached chain-validation memo is set to `Valid` provisionally,
    /// and the first call to `verify_chain` performs the real
    /// cryptographic pass.
    pub fn new(path: impl AsRef<Path>, signer: Box<dyn Signer>) -> Result<Self> {
        Self::with_options(path, signer, FilePolicyLogOptions::default())
    }

    /// As [`FilePolicyLog::new`], with explicit options.
    pub fn with_options(
        path: impl AsRef<Path>,
        signer: Box<dyn Signer>,
        options: FilePolicyLogOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (seals, kept_lines, truncated) = reload(&path, &options)?;

        if truncated {
            rewrite_file(&path, &kept_lines)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            signer,
            options,
            state: RwLock::new(State {
                seals,
                cached_valid: true,
                file: Some(file),
            }),
            metrics: LogMetrics::new(),
            observer: Box::new(NullObserver),
        })
    }

    /// Attaches a non-default observer.
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Closes the underlying file handle. Idempotent: a second call is a
    /// no-op. A subsequent `append` transparently reopens the file in
    /// append mode.
    pub fn close(&self) {
        let mut state = self.state.write().expect("policy log lock poisoned");
        state.file = None;
    }

    /// Path to the persisted ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_record(seal: &PolicySeal) -> FileRecord {
    FileRecord {
        signature: BASE64.encode(seal.signature()),
        effective_at: format_effective_at(&seal.effective_at()),
        previous_hash: BASE64.encode(seal.previous_hash()),
        index: seal.index(),
        policy: seal.policy().clone(),
    }
}

/// Reads and validates the ledger file, returning the accepted seals, the
/// raw lines backing them (for a truncating rewrite), and whether any
/// line was rejected.
fn reload(
    path: &Path,
    options: &FilePolicyLogOptions,
) -> Result<(Vec<PolicySeal>, Vec<String>, bool)> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new(), false));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut seals = Vec::new();
    let mut kept_lines = Vec::new();
    let mut expected_previous_hash = [0u8; 32];
    let mut truncated = false;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = parse_and_validate_record(&line, seals.len() as u32, &expected_previous_hash, options);
        match parsed {
            Some(seal) => {
                expected_previous_hash = link_hash(&seal.signature());
                seals.push(seal);
                kept_lines.push(line);
            }
            None => {
                truncated = true;
                break;
            }
        }
    }

    Ok((seals, kept_lines, truncated))
}

fn parse_and_validate_record(
    line: &str,
    expected_index: u32,
    expected_previous_hash: &[u8; 32],
    options: &FilePolicyLogOptions,
) -> Option<PolicySeal> {
    let record: FileRecord = serde_json::from_str(line).ok()?;

    let signature = BASE64.decode(&record.signature).ok()?;
    let previous_hash_vec = BASE64.decode(&record.previous_hash).ok()?;
    let previous_hash: [u8; 32] = previous_hash_vec.try_into().ok()?;
    if previous_hash != *expected_previous_hash {
        return None;
    }
    if record.index != expected_index {
        return None;
    }
    let effective_at = DateTime::parse_from_rfc3339(&record.effective_at)
        .ok()?
        .with_timezone(&Utc);

    Some(PolicySeal::reconstruct(
        record.index,
        effective_at,
        previous_hash,
        record.policy,
        options.root_chain_hash,
        signature,
    ))
}

fn rewrite_file(path: &Path, kept_lines: &[String]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for line in kept_lines {
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(())
}

impl PolicyLog for FilePolicyLog {
    fn append(&self, policy: PolicyRecord, effective_at: DateTime<Utc>) -> Result<PolicySeal> {
        let start = Instant::now();
        let mut state = self.state.write().expect("policy log lock poisoned");
        let previous = state.seals.last();
        let seal = PolicySeal::create(
            policy,
            effective_at,
            previous,
            self.signer.as_ref(),
            Some(self.options.root_chain_hash),
        )?;

        let line = serde_json::to_string(&encode_record(&seal)).map_err(GovernanceError::from)?;

        if state.file.is_none() {
            state.file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }
        let file = state.file.as_mut().expect("file handle just populated");
        writeln!(file, "{line}")?;
        file.flush()?;

        // Only touch the in-memory list once persistence has succeeded,
        // so memory and file never disagree.
        state.seals.push(seal.clone());
        state.cached_valid = false;
        let seals_after = state.seals.len() as u32;
        drop(state);

        self.metrics
            .record_append(start.elapsed().as_nanos() as u64, seals_after);
        self.observer
            .on_event(GovernanceEvent::SealAppended { index: seal.index() });
        Ok(seal)
    }

    fn get_policy_at(&self, timestamp: DateTime<Utc>) -> Option<PolicyRecord> {
        let state = self.state.read().expect("policy log lock poisoned");
        policy_at(&state.seals, timestamp).cloned()
    }

    fn get_all_seals(&self) -> Vec<PolicySeal> {
        let state = self.state.read().expect("policy log lock poisoned");
        state.seals.clone()
    }

    fn verify_chain(&self) -> ChainValidationResult {
        {
            let state = self.state.read().expect("policy log lock poisoned");
            if state.cached_valid {
                self.metrics.record_chain_verify(true);
                self.observer.on_event(GovernanceEvent::ChainVerified {
                    valid: true,
                    cache_hit: true,
                });
                return ChainValidationResult::valid();
            }
        }

        let seals = self.get_all_seals();
        let result = verify_seals(&seals, self.signer.as_ref());
        self.metrics.record_chain_verify(false);
        self.observer.on_event(GovernanceEvent::ChainVerified {
            valid: result.is_valid,
            cache_hit: false,
        });

        if result.is_valid {
            let mut state = self.state.write().expect("policy log lock poisoned");
            state.cached_valid = true;
        }
        result
    }

    fn count(&self) -> u32 {
        self.state.read().expect("policy log lock poisoned").seals.len() as u32
    }

    fn metrics(&self) -> &LogMetrics {
        &self.metrics
    }

    fn close(&self) {
        FilePolicyLog::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::TtlRule;
    use crate::signer::HashChainSigner;
    use chrono::TimeZone;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(label: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!("acorn_governance_{label}_{nanos}.jsonl"));
        path
    }

    fn rule(name: &str) -> PolicyRecord {
        PolicyRecord::Ttl(TtlRule {
            name: name.to_string(),
            description: String::new(),
            priority: 1,
        })
    }

    #[test]
    fn append_persists_and_reloads() {
        let path = temp_path("reload");
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        {
            let log = FilePolicyLog::new(&path, Box::new(HashChainSigner::new())).unwrap();
            log.append(rule("R1"), t0).unwrap();
            log.append(rule("R2"), t0 + chrono::Duration::minutes(5)).unwrap();
        }

        let reloaded = FilePolicyLog::new(&path, Box::new(HashChainSigner::new())).unwrap();
        assert_eq!(reloaded.count(), 2);
        assert!(reloaded.verify_chain().is_valid);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn crash_recovery_truncates_at_first_corruption() {
        let path = temp_path("crash");
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        {
            let log = FilePolicyLog::new(&path, Box::new(HashChainSigner::new())).unwrap();
            log.append(rule("R1"), t0).unwrap();
            log.append(rule("R2"), t0 + chrono::Duration::minutes(5)).unwrap();
            log.append(rule("R3"), t0 + chrono::Duration::minutes(10)).unwrap();
        }

        // Corrupt line 2 by truncating it mid-JSON.
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        let half = lines[1].len() / 2;
        let corrupted = &lines[1][..half];

        let mut rebuilt = String::new();
        rebuilt.push_str(lines[0]);
        rebuilt.push('\n');
        rebuilt.push_str(corrupted);
        rebuilt.push('\n');
        rebuilt.push_str(lines[2]);
        rebuilt.push('\n');
        std::fs::write(&path, rebuilt).unwrap();

        let reopened = FilePolicyLog::new(&path, Box::new(HashChainSigner::new())).unwrap();
        assert_eq!(reopened.count(), 1);

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.lines().count(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn close_is_idempotent_and_append_recovers() {
        let path = temp_path("close");
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let log = FilePolicyLog::new(&path, Box::new(HashChainSigner::new())).unwrap();
        log.append(rule("R1"), t0).unwrap();
        log.close();
        log.close();
        log.append(rule("R2"), t0 + chrono::Duration::minutes(1)).unwrap();
        assert_eq!(log.count(), 2);
        std::fs::remove_file(&path).ok();
    }
}
