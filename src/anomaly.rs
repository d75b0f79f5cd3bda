//! Anomaly ledger
//!
//! Hand-curated corrections for upstream data: wrong episode titles and
//! per-act audio/video sync offsets in milliseconds. Read-only.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading the anomaly ledger
#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("Failed to read anomaly ledger {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse anomaly ledger {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Overrides stored under one key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnomalyEntry {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(rename = "video-sync", default)]
    pub video_sync: Option<i64>,

    #[serde(rename = "audio-sync", default)]
    pub audio_sync: Option<i64>,
}

/// Lookup of anomalies keyed by `S{ss}E{ee}`, `S{ss}E{ee}{LANG}` or `S{ss}E{ee}A{act}{LANG}`
#[derive(Debug, Clone, Default)]
pub struct AnomalyLedger {
    entries: HashMap<String, AnomalyEntry>,
}

impl AnomalyLedger {
    /// Loads the ledger; a missing file means "no anomalies"
    pub fn open(path: &Path) -> Result<Self, AnomalyError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| AnomalyError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_json(&content).map_err(|e| AnomalyError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entries: serde_json::from_str(content)?,
        })
    }

    /// Title override; an episode-wide entry wins over a per-language one
    pub fn title(&self, season: u32, episode: u32, language: &str) -> Option<&str> {
        let keys = [
            format!("S{:02}E{:02}", season, episode),
            format!("S{:02}E{:02}{}", season, episode, language.to_uppercase()),
        ];

        keys.iter()
            .filter_map(|key| self.entries.get(key))
            .find_map(|entry| entry.title.as_deref())
    }

    pub fn video_sync(&self, season: u32, episode: u32, act: u32, language: &str) -> Option<i64> {
        self.act_entry(season, episode, act, language)
            .and_then(|entry| entry.video_sync)
    }

    pub fn audio_sync(&self, season: u32, episode: u32, act: u32, language: &str) -> Option<i64> {
        self.act_entry(season, episode, act, language)
            .and_then(|entry| entry.audio_sync)
    }

    fn act_entry(&self, season: u32, episode: u32, act: u32, language: &str) -> Option<&AnomalyEntry> {
        let key = crate::naming::act_label(season, episode, act, language);
        self.entries.get(&key)
    }
}
