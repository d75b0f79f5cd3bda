//! Checksum ledger
//!
//! Remembers the SHA-256 hash of every act ever downloaded, keyed by
//! `S{ss}E{ee}A{act}{LANG}`, together with the time it was last verified.
//! The ledger is read lazily on first access and always written back as a
//! whole, with sorted keys, so the file diffs cleanly.

use crate::naming::act_label;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading, hashing or writing checksums
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Failed to read the ledger file
    #[error("Failed to read checksum ledger {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the ledger file
    #[error("Failed to parse checksum ledger {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to write the ledger file
    #[error("Failed to write checksum ledger {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a file while hashing it
    #[error("Failed to hash {path}: {source}")]
    HashFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the ledger
    #[error("Failed to serialize checksum ledger: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// One ledger entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(
        rename = "last-checked",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_checked: Option<String>,

    /// Keys this version does not know about, written back unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Persistent ledger of expected hashes
pub struct ChecksumLedger {
    path: PathBuf,
    entries: Option<BTreeMap<String, ChecksumEntry>>,
}

impl ChecksumLedger {
    /// Creates a ledger backed by `path`; nothing is read until first use
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
        }
    }

    fn entries(&mut self) -> Result<&mut BTreeMap<String, ChecksumEntry>, ChecksumError> {
        if self.entries.is_none() {
            self.entries = Some(load_entries(&self.path)?);
        }

        Ok(self.entries.get_or_insert_with(BTreeMap::new))
    }

    /// Returns the expected hash, if one was ever recorded
    pub fn get_hash(
        &mut self,
        season: u32,
        episode: u32,
        act: u32,
        language: &str,
    ) -> Result<Option<String>, ChecksumError> {
        let key = act_label(season, episode, act, language);
        Ok(self.entries()?.get(&key).and_then(|e| e.hash.clone()))
    }

    /// Records a new hash; also refreshes the last-checked timestamp
    pub fn update_hash(
        &mut self,
        season: u32,
        episode: u32,
        act: u32,
        language: &str,
        hash: &str,
    ) -> Result<(), ChecksumError> {
        let key = act_label(season, episode, act, language);
        self.entries()?.entry(key).or_default().hash = Some(hash.to_string());
        self.update_last_checked(season, episode, act, language)
    }

    /// Sets the last-checked timestamp to now
    pub fn update_last_checked(
        &mut self,
        season: u32,
        episode: u32,
        act: u32,
        language: &str,
    ) -> Result<(), ChecksumError> {
        let key = act_label(season, episode, act, language);
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S+00:00").to_string();
        self.entries()?.entry(key).or_default().last_checked = Some(now);
        Ok(())
    }

    /// Rewrites the whole ledger file with sorted keys
    ///
    /// The file is written next to its final location first and then
    /// renamed over it, so an interrupted save leaves the last good copy.
    pub fn save(&mut self) -> Result<(), ChecksumError> {
        let mut content = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut content, formatter);
        self.entries()?.serialize(&mut serializer)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ChecksumError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| ChecksumError::WriteFailed {
            path: temp_path.clone(),
            source: e,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| ChecksumError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, ChecksumEntry>, ChecksumError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|e| ChecksumError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&content).map_err(|e| ChecksumError::ParseFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Computes the hex-encoded SHA-256 hash of a file
///
/// Reads in 512KB chunks, so multi-gigabyte files never sit in memory.
pub fn compute_hash(path: &Path) -> Result<String, ChecksumError> {
    const BUFFER_SIZE: usize = 512 * 1024;

    let hash_failed = |e| ChecksumError::HashFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(hash_failed)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(hash_failed)?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Outcome of hashing one file against its expected hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Hash of the file as it was read
    pub actual: String,
    pub matches: bool,
}

/// Hashes a file once and compares it to `expected`
///
/// Never touches any ledger.
pub fn verify(path: &Path, expected: &str) -> Result<Verification, ChecksumError> {
    let actual = compute_hash(path)?;
    let matches = actual.eq_ignore_ascii_case(expected);

    Ok(Verification { actual, matches })
}
